use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_derive::Deserialize;

use crate::ack::MessageAck;
use crate::channel::SharedChannel;
use crate::consumer::{self, ConsumerOptions};
use crate::message::{MessageEnvelope, MessageProperties, Response};
use crate::model::{IfEmpty, IfUnused};
use crate::serializer::{self, Serializer};
use crate::sink::{DecodingSink, MessageSink, ReceiveSink, RpcResponder};
use crate::subscription::Subscription;

/// Properties of a queue to declare.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    /// Serializer of the subscriptions which don't set their own. JSON if not set.
    #[serde(skip)]
    pub serializer: Option<Arc<dyn Serializer>>,
}

impl QueueOptions {
    pub fn passive(mut self, value: bool) -> Self {
        self.passive = value;
        self
    }

    pub fn durable(mut self, value: bool) -> Self {
        self.durable = value;
        self
    }

    pub fn exclusive(mut self, value: bool) -> Self {
        self.exclusive = value;
        self
    }

    pub fn auto_delete(mut self, value: bool) -> Self {
        self.auto_delete = value;
        self
    }

    pub fn serializer(mut self, value: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(value);
        self
    }
}

/// Handle of a declared queue.
///
/// Every operation issues its broker commands on the shared channel under the channel lock;
/// the consume and respond callbacks are called without it.
pub struct Queue {
    name: String,
    message_count: u32,
    consumer_count: u32,
    channel: Arc<SharedChannel>,
    options: QueueOptions,
    default_serializer: Arc<dyn Serializer>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Queue '{}' {:?}", self.name, self.options)
    }
}

impl Queue {
    /// Declares the queue. An empty name makes the broker generate one.
    pub fn declare(channel: &Arc<SharedChannel>, name: &str, options: QueueOptions) -> Result<Queue> {
        let declared = channel.queue_declare(name, &options)?;

        debug!("Queue {:?} is declared", declared.queue_name);

        let default_serializer = options.serializer.clone().unwrap_or_else(serializer::default_serializer);

        Ok(Queue {
            name: declared.queue_name,
            message_count: declared.message_count,
            consumer_count: declared.consumer_count,
            channel: channel.clone(),
            options,
            default_serializer,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of messages in the queue when it was declared.
    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    /// Number of consumers of the queue when it was declared.
    pub fn consumer_count(&self) -> u32 {
        self.consumer_count
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn channel(&self) -> &Arc<SharedChannel> {
        &self.channel
    }

    pub fn default_serializer(&self) -> &Arc<dyn Serializer> {
        &self.default_serializer
    }

    /// Removes the messages of the queue, returns the number of removed messages.
    pub fn purge(&self) -> Result<u32> {
        self.channel.queue_purge(&self.name)
    }

    /// Deletes the queue, returns the number of messages deleted with it.
    pub fn delete(&self) -> Result<u32> {
        self.delete_if(IfUnused(false), IfEmpty(false))
    }

    pub fn delete_if(&self, if_unused: IfUnused, if_empty: IfEmpty) -> Result<u32> {
        self.channel.queue_delete(&self.name, if_unused.0, if_empty.0)
    }

    /// Publishes a message to this queue through the default exchange.
    pub fn publish(&self, properties: MessageProperties, body: Vec<u8>) -> Result<()> {
        self.channel.basic_publish("", &self.name, properties, body)
    }

    /// Starts consuming the queue with raw payloads. Unless `options.no_ack` is set the callback
    /// has to ack or nack every message through the [`MessageAck`] it gets.
    pub fn consume_raw<F>(&self, on_received: F, options: ConsumerOptions) -> Result<Subscription>
    where
        F: Fn(MessageEnvelope, &MessageAck) -> Result<()> + Send + Sync + 'static,
    {
        self.subscribe(Box::new(ReceiveSink::new(on_received)), &options)
    }

    /// Starts consuming the queue, decoding the payloads with the serializer of the subscription.
    pub fn consume<T, F>(&self, on_received: F, options: ConsumerOptions) -> Result<Subscription>
    where
        T: DeserializeOwned + 'static,
        F: Fn(MessageEnvelope<T>, &MessageAck) -> Result<()> + Send + Sync + 'static,
    {
        let codec = self.serializer_for(&options);

        self.subscribe(Box::new(DecodingSink::new(codec, on_received)), &options)
    }

    /// Answers the requests arriving to the queue with what the callback returns.
    pub fn respond_raw<R, F>(&self, on_respond: F, options: ConsumerOptions) -> Result<Subscription>
    where
        R: Serialize + 'static,
        F: Fn(MessageEnvelope, &MessageAck) -> Result<Response<R>> + Send + Sync + 'static,
    {
        let responder = RpcResponder::new(
            self.channel.clone(),
            self.serializer_for(&options),
            on_respond,
            options.serialize_exceptions,
        );

        self.subscribe(Box::new(responder), &options)
    }

    /// Like [`Queue::respond_raw`] but the requests are decoded and the responses are encoded
    /// with the serializer of the subscription. A request which cannot be decoded is handled as
    /// a failed handler.
    pub fn respond<T, R, F>(&self, on_respond: F, options: ConsumerOptions) -> Result<Subscription>
    where
        T: DeserializeOwned + 'static,
        R: Serialize + 'static,
        F: Fn(MessageEnvelope<T>, &MessageAck) -> Result<R> + Send + Sync + 'static,
    {
        let codec = self.serializer_for(&options);

        self.respond_raw(
            move |envelope, ack| {
                let envelope = envelope.try_map(|body| serializer::deserialize::<T>(codec.as_ref(), &body))?;

                on_respond(envelope, ack).map(Response::Encoded)
            },
            options,
        )
    }

    fn serializer_for(&self, options: &ConsumerOptions) -> Arc<dyn Serializer> {
        options
            .serializer
            .clone()
            .unwrap_or_else(|| self.default_serializer.clone())
    }

    fn subscribe(&self, sink: Box<dyn MessageSink>, options: &ConsumerOptions) -> Result<Subscription> {
        let producer = consumer::create(options.strategy, &self.channel, options.no_ack, &self.name);

        producer.subscribe(sink)?;

        let consumer_tag = self
            .channel
            .basic_consume(&self.name, options.no_ack, producer.into_consumer())?;

        debug!(
            "Consumer {consumer_tag} started on {:?} with {:?}",
            self.name, options.strategy
        );

        Ok(Subscription::new(consumer_tag, &self.channel))
    }
}
