//! Targets the consumer strategies forward the deliveries to.

mod responder;

pub use responder::RpcResponder;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;

use crate::ack::MessageAck;
use crate::error::{ClientError, ErrorKind};
use crate::message::MessageEnvelope;
use crate::serializer::{self, Serializer};

/// Handles the envelopes of one subscription. Consumer strategies depend only on this trait.
///
/// An error returned by `handle` makes the consumer strategy nack the delivery without requeue,
/// unless the acknowledgement handle was already used.
pub trait MessageSink: Send + Sync {
    fn handle(&self, envelope: MessageEnvelope, ack: &MessageAck) -> Result<()>;
}

/// Marks an error returned by application code.
pub(crate) fn handler_failure(err: anyhow::Error) -> anyhow::Error {
    err.context(ClientError::new(ErrorKind::HandlerFailure, "message handler failed"))
}

/// Forwards the raw envelopes to a receive callback. The callback decides about acknowledging
/// the message.
pub struct ReceiveSink<F> {
    on_received: F,
}

impl<F> ReceiveSink<F>
where
    F: Fn(MessageEnvelope, &MessageAck) -> Result<()> + Send + Sync,
{
    pub fn new(on_received: F) -> Self {
        Self { on_received }
    }
}

impl<F> MessageSink for ReceiveSink<F>
where
    F: Fn(MessageEnvelope, &MessageAck) -> Result<()> + Send + Sync,
{
    fn handle(&self, envelope: MessageEnvelope, ack: &MessageAck) -> Result<()> {
        (self.on_received)(envelope, ack).map_err(handler_failure)
    }
}

impl<F> fmt::Debug for ReceiveSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveSink").finish_non_exhaustive()
    }
}

/// Decodes the payload with the serializer of the subscription before calling the receive
/// callback. A payload which cannot be decoded is a [`ErrorKind::Serialization`] error and the
/// callback is not called.
pub struct DecodingSink<T, F> {
    serializer: Arc<dyn Serializer>,
    on_received: F,
    payload: PhantomData<fn() -> T>,
}

impl<T, F> DecodingSink<T, F>
where
    T: DeserializeOwned,
    F: Fn(MessageEnvelope<T>, &MessageAck) -> Result<()> + Send + Sync,
{
    pub fn new(serializer: Arc<dyn Serializer>, on_received: F) -> Self {
        Self {
            serializer,
            on_received,
            payload: PhantomData,
        }
    }
}

impl<T, F> MessageSink for DecodingSink<T, F>
where
    T: DeserializeOwned,
    F: Fn(MessageEnvelope<T>, &MessageAck) -> Result<()> + Send + Sync,
{
    fn handle(&self, envelope: MessageEnvelope, ack: &MessageAck) -> Result<()> {
        let envelope = envelope.try_map(|body| serializer::deserialize::<T>(self.serializer.as_ref(), &body))?;

        (self.on_received)(envelope, ack).map_err(handler_failure)
    }
}
