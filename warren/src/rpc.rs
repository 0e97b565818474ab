//! Requesting side of the request/reply pattern.
//!
//! ```no_run
//! use warren::{memory::MemoryBroker, ConsumerOptions, Queue, QueueOptions, RpcClient, SharedChannel};
//!
//! # fn main() -> anyhow::Result<()> {
//! let broker = MemoryBroker::new();
//! let channel = SharedChannel::new(broker.channel());
//!
//! let requests = Queue::declare(&channel, "ping", QueueOptions::default())?;
//! let _responder = requests.respond(|_ping: warren::MessageEnvelope<String>, ack| {
//!     ack.ack()?;
//!     Ok("pong".to_string())
//! }, ConsumerOptions::default())?;
//!
//! let replies = Queue::declare(&channel, "", QueueOptions::default().exclusive(true))?;
//! let client = RpcClient::new(&replies)?;
//!
//! let pending = client.call("ping", &"ping")?;
//! broker.dispatch();
//! let pong: String = pending.wait_for()?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::channel::SharedChannel;
use crate::client_error;
use crate::consumer::ConsumerOptions;
use crate::error::ErrorKind;
use crate::message::{Fault, MessageEnvelope, MessageProperties};
use crate::queue::Queue;
use crate::serializer::{self, Serializer};
use crate::subscription::Subscription;

type PendingCalls = Arc<Mutex<HashMap<String, oneshot::Sender<MessageEnvelope>>>>;

/// Sends requests and matches the replies arriving to its reply queue by correlation id.
pub struct RpcClient {
    channel: Arc<SharedChannel>,
    reply_to: String,
    serializer: Arc<dyn Serializer>,
    pending: PendingCalls,
    subscription: Subscription,
}

/// A request waiting for its reply.
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: String,
    serializer: Arc<dyn Serializer>,
    reply: oneshot::Receiver<MessageEnvelope>,
}

impl RpcClient {
    /// Starts consuming the reply queue. Replies are consumed with `no_ack` on the delivery
    /// thread of the broker client.
    pub fn new(reply_queue: &Queue) -> Result<Self> {
        let pending = PendingCalls::default();
        let waiting = pending.clone();

        let subscription = reply_queue.consume_raw(
            move |envelope, _ack| {
                let waiter = envelope
                    .correlation_id()
                    .and_then(|id| waiting.lock().unwrap_or_else(PoisonError::into_inner).remove(id));

                match waiter {
                    Some(tx) => {
                        // The caller may have dropped its PendingReply, nobody to tell then.
                        let _ = tx.send(envelope);
                    }
                    None => warn!(
                        "Reply {} with correlation id {:?} doesn't belong to any request",
                        envelope.delivery_tag(),
                        envelope.correlation_id()
                    ),
                }

                Ok(())
            },
            ConsumerOptions::default().no_ack(true),
        )?;

        Ok(Self {
            channel: reply_queue.channel().clone(),
            reply_to: reply_queue.name().to_string(),
            serializer: reply_queue.default_serializer().clone(),
            pending,
            subscription,
        })
    }

    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    /// Publishes a request with raw body to the default exchange.
    pub fn call_raw(&self, routing_key: &str, properties: MessageProperties, body: Vec<u8>) -> Result<PendingReply> {
        if routing_key.is_empty() {
            return client_error!(ErrorKind::ArgumentNull, "routing key of the request is required");
        }

        let correlation_id = uuid::Uuid::new_v4().as_hyphenated().to_string();
        let (tx, rx) = oneshot::channel();

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(correlation_id.clone(), tx);

        let properties = MessageProperties {
            correlation_id: Some(correlation_id.clone()),
            reply_to: Some(self.reply_to.clone()),
            ..properties
        };

        if let Err(e) = self.channel.basic_publish("", routing_key, properties, body) {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&correlation_id);

            return Err(e);
        }

        debug!("Request {correlation_id} is sent to {routing_key:?}");

        Ok(PendingReply {
            correlation_id,
            serializer: self.serializer.clone(),
            reply: rx,
        })
    }

    /// Publishes a request encoded with the serializer of the reply queue.
    pub fn call<Req: Serialize + ?Sized>(&self, routing_key: &str, request: &Req) -> Result<PendingReply> {
        let body = serializer::serialize(self.serializer.as_ref(), request)?;
        let properties = MessageProperties::default().content_type(self.serializer.content_type());

        self.call_raw(routing_key, properties, body)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Stops consuming the reply queue. Requests still waiting fail.
    pub fn close(mut self) -> Result<()> {
        self.subscription.cancel()?;
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).clear();

        Ok(())
    }
}

impl PendingReply {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Blocks until the reply arrives. Must not be called from an async context.
    pub fn wait(self) -> Result<MessageEnvelope> {
        match self.reply.blocking_recv() {
            Ok(envelope) => Ok(envelope),
            Err(_) => client_error!(
                ErrorKind::InvalidState,
                format!("request {} will not get a reply, the client is closed", self.correlation_id)
            ),
        }
    }

    /// Waits for the reply and decodes it. A fault reply becomes a [`ErrorKind::RemoteFault`]
    /// error with the message of the remote failure.
    pub fn wait_for<T: DeserializeOwned>(self) -> Result<T> {
        let codec = self.serializer.clone();
        let envelope = self.wait()?;

        if envelope.properties().is_fault() {
            let fault: Fault = serializer::deserialize(codec.as_ref(), envelope.payload())?;

            return client_error!(ErrorKind::RemoteFault, fault.message);
        }

        serializer::deserialize(codec.as_ref(), envelope.payload())
    }
}
