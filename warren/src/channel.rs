//! The broker channel collaborator and the lock every broker command is issued under.
//!
//! A channel is not safe for concurrent command issuance, so a [`Queue`](crate::Queue), its
//! subscriptions and the acknowledgement handles of the deliveries share one [`SharedChannel`].
//! Each command takes the lock for the duration of the command only; application callbacks are
//! never invoked while it is held.

use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::trace;

use crate::client_error;
use crate::error::ErrorKind;
use crate::message::{Delivery, MessageProperties};
use crate::model::{ConsumerTag, DeliveryTag};
use crate::queue::QueueOptions;

/// Answer of the broker to a queue declaration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueDeclareOk {
    pub queue_name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Receives the deliveries of one `Basic.Consume` registration.
///
/// The broker client calls it from its own delivery thread, in delivery order, and never while
/// the channel lock is held.
pub trait BasicConsumer: Send + Sync {
    /// Handles one delivery. An error is reported back to the broker client.
    fn handle_delivery(&self, delivery: Delivery) -> Result<()>;

    /// The consumer was cancelled, no more deliveries will arrive.
    fn handle_cancel(&self, _consumer_tag: &str) {}
}

/// Commands of an AMQP channel, implemented by the broker client.
pub trait BrokerChannel: Send {
    fn create_properties(&self) -> MessageProperties {
        MessageProperties::default()
    }

    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<()>;

    /// Starts consuming the queue and returns the consumer tag the broker assigned.
    fn basic_consume(&mut self, queue: &str, no_ack: bool, consumer: Arc<dyn BasicConsumer>) -> Result<ConsumerTag>;

    fn basic_cancel(&mut self, consumer_tag: &str) -> Result<()>;

    fn basic_ack(&mut self, delivery_tag: DeliveryTag, multiple: bool) -> Result<()>;

    fn basic_nack(&mut self, delivery_tag: DeliveryTag, multiple: bool, requeue: bool) -> Result<()>;

    fn queue_declare(&mut self, queue: &str, options: &QueueOptions) -> Result<QueueDeclareOk>;

    /// Returns the number of purged messages.
    fn queue_purge(&mut self, queue: &str) -> Result<u32>;

    /// Returns the number of messages deleted with the queue.
    fn queue_delete(&mut self, queue: &str, if_unused: bool, if_empty: bool) -> Result<u32>;
}

/// A broker channel together with the mutex which serializes the commands issued on it.
pub struct SharedChannel {
    channel: Mutex<Box<dyn BrokerChannel>>,
}

impl fmt::Debug for SharedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedChannel").finish_non_exhaustive()
    }
}

impl SharedChannel {
    pub fn new(channel: impl BrokerChannel + 'static) -> Arc<Self> {
        Arc::new(Self {
            channel: Mutex::new(Box::new(channel)),
        })
    }

    /// Runs one command with the channel lock held.
    fn with<T>(&self, command: impl FnOnce(&mut dyn BrokerChannel) -> Result<T>) -> Result<T> {
        let mut channel = match self.channel.lock() {
            Ok(guard) => guard,
            Err(_) => return client_error!(ErrorKind::Channel, "channel lock is poisoned"),
        };

        command(&mut **channel)
    }

    pub fn create_properties(&self) -> Result<MessageProperties> {
        self.with(|ch| Ok(ch.create_properties()))
    }

    pub fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<()> {
        trace!("Basic.Publish exchange={exchange:?} routing_key={routing_key:?} size={}", body.len());

        self.with(|ch| ch.basic_publish(exchange, routing_key, properties, body))
    }

    pub fn basic_consume(&self, queue: &str, no_ack: bool, consumer: Arc<dyn BasicConsumer>) -> Result<ConsumerTag> {
        if queue.is_empty() {
            return client_error!(ErrorKind::ArgumentNull, "queue name is required for consuming");
        }

        trace!("Basic.Consume queue={queue:?} no_ack={no_ack}");

        self.with(|ch| ch.basic_consume(queue, no_ack, consumer))
    }

    pub fn basic_cancel(&self, consumer_tag: &str) -> Result<()> {
        trace!("Basic.Cancel consumer_tag={consumer_tag:?}");

        self.with(|ch| ch.basic_cancel(consumer_tag))
    }

    pub fn basic_ack(&self, delivery_tag: DeliveryTag, multiple: bool) -> Result<()> {
        trace!("Basic.Ack delivery_tag={delivery_tag} multiple={multiple}");

        self.with(|ch| ch.basic_ack(delivery_tag, multiple))
    }

    pub fn basic_nack(&self, delivery_tag: DeliveryTag, multiple: bool, requeue: bool) -> Result<()> {
        trace!("Basic.Nack delivery_tag={delivery_tag} multiple={multiple} requeue={requeue}");

        self.with(|ch| ch.basic_nack(delivery_tag, multiple, requeue))
    }

    pub fn queue_declare(&self, queue: &str, options: &QueueOptions) -> Result<QueueDeclareOk> {
        trace!("Queue.Declare queue={queue:?} {options:?}");

        self.with(|ch| ch.queue_declare(queue, options))
    }

    pub fn queue_purge(&self, queue: &str) -> Result<u32> {
        trace!("Queue.Purge queue={queue:?}");

        self.with(|ch| ch.queue_purge(queue))
    }

    pub fn queue_delete(&self, queue: &str, if_unused: bool, if_empty: bool) -> Result<u32> {
        trace!("Queue.Delete queue={queue:?} if_unused={if_unused} if_empty={if_empty}");

        self.with(|ch| ch.queue_delete(queue, if_unused, if_empty))
    }
}
