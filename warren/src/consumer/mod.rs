//! Consumer strategies pump the deliveries of a `Basic.Consume` into one [`MessageSink`].
//!
//! * [`ConsumerStrategy::Push`] forwards every delivery on the thread the broker client delivers
//!   on.
//! * [`ConsumerStrategy::Pull`] puts the deliveries into a queue which is drained by a dedicated
//!   pump thread.
//!
//! Both keep the delivery order of the broker. When the sink fails the delivery is nacked without
//! requeue, unless the sink already acked or nacked it.

mod queueing;
mod streaming;

use std::str::FromStr;
use std::sync::{Arc, Weak};

use anyhow::Result;
use log::error;
use serde_derive::Deserialize;

use crate::ack::MessageAck;
use crate::channel::{BasicConsumer, SharedChannel};
use crate::client_error;
use crate::error::{ClientError, ErrorKind};
use crate::message::Delivery;
use crate::serializer::Serializer;
use crate::sink::MessageSink;

pub(crate) use queueing::QueueingConsumer;
pub(crate) use streaming::StreamingConsumer;

/// Selects how deliveries get to the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ConsumerStrategy {
    /// Deliveries are handled on the delivery thread of the broker client.
    #[default]
    Push,
    /// Deliveries are queued and handled on a pump thread of the subscription.
    Pull,
}

impl FromStr for ConsumerStrategy {
    type Err = ClientError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push" | "default" => Ok(ConsumerStrategy::Push),
            "pull" | "queue" => Ok(ConsumerStrategy::Pull),
            other => Err(ClientError::new(
                ErrorKind::InvalidState,
                format!("unsupported consumer strategy {other:?}"),
            )),
        }
    }
}

impl TryFrom<String> for ConsumerStrategy {
    type Error = ClientError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Options of a consumer subscription.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// The broker considers the messages acknowledged once delivered, [`MessageAck`] does nothing.
    pub no_ack: bool,
    pub strategy: ConsumerStrategy,
    /// Overrides the default serializer of the queue.
    #[serde(skip)]
    pub serializer: Option<Arc<dyn Serializer>>,
    /// Responders reply with a fault payload instead of returning the handler error.
    pub serialize_exceptions: bool,
}

impl ConsumerOptions {
    pub fn no_ack(mut self, value: bool) -> Self {
        self.no_ack = value;
        self
    }

    pub fn strategy(mut self, value: ConsumerStrategy) -> Self {
        self.strategy = value;
        self
    }

    pub fn serializer(mut self, value: Arc<dyn Serializer>) -> Self {
        self.serializer = Some(value);
        self
    }

    pub fn serialize_exceptions(mut self, value: bool) -> Self {
        self.serialize_exceptions = value;
        self
    }
}

/// A consumer strategy: accepts exactly one sink and then serves the broker deliveries.
pub(crate) trait MessageProducer: Send + Sync {
    /// Registers the sink. A second registration fails with [`ErrorKind::InvalidState`].
    fn subscribe(&self, sink: Box<dyn MessageSink>) -> Result<()>;

    fn into_consumer(self: Arc<Self>) -> Arc<dyn BasicConsumer>;
}

/// The strategies refer to the channel weakly, the channel stores them as its consumers.
pub(crate) fn create(
    strategy: ConsumerStrategy,
    channel: &Arc<SharedChannel>,
    no_ack: bool,
    queue: &str,
) -> Arc<dyn MessageProducer> {
    match strategy {
        ConsumerStrategy::Push => Arc::new(StreamingConsumer::new(channel, no_ack)),
        ConsumerStrategy::Pull => Arc::new(QueueingConsumer::new(channel, no_ack, queue)),
    }
}

fn already_subscribed<T>() -> Result<T> {
    client_error!(ErrorKind::InvalidState, "consumer already has a sink subscribed")
}

/// Builds the envelope and the acknowledgement handle of one delivery and hands them to the sink.
///
/// A delivery arriving after the channel was dropped is not handled, the broker gets it back with
/// the closed channel.
fn dispatch(sink: &dyn MessageSink, channel: &Weak<SharedChannel>, no_ack: bool, delivery: Delivery) -> Result<()> {
    let delivery_tag = delivery.delivery_tag;

    let channel = match channel.upgrade() {
        Some(channel) => channel,
        None => {
            error!("Channel is closed, delivery {delivery_tag} is dropped");

            return client_error!(
                ErrorKind::Channel,
                format!("channel is closed, delivery {delivery_tag} cannot be handled")
            );
        }
    };

    let ack = MessageAck::new(delivery_tag, channel, no_ack);

    if let Err(e) = sink.handle(delivery.into(), &ack) {
        error!("Handling delivery {delivery_tag} failed: {e:#}");

        if let Err(nack_err) = ack.reject_unsettled() {
            error!("Cannot nack delivery {delivery_tag}: {nack_err:#}");
        }

        return Err(e);
    }

    Ok(())
}
