use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use anyhow::Result;
use log::{debug, error, warn};
use serde::Serialize;

use crate::ack::MessageAck;
use crate::channel::SharedChannel;
use crate::client_error;
use crate::error::ErrorKind;
use crate::message::{Fault, MessageEnvelope, Response, FAULT_HEADER};
use crate::serializer::{self, Serializer};
use crate::sink::{handler_failure, MessageSink};

const RAW_CONTENT_TYPE: &str = "application/octet-stream";

/// Turns a consumer into the responding side of a request/reply exchange.
///
/// For every request it calls the handler and publishes the result to the default exchange with
/// the `reply_to` of the request as routing key, carrying over the `correlation_id`. The handler
/// runs without the channel lock, only the reply publish takes it.
///
/// If the handler fails and `serialize_exceptions` is set, the reply is an encoded [`Fault`]
/// marked with the [`FAULT_HEADER`] header, and the acknowledgement of the request is left as the
/// handler left it. Otherwise the error is returned, no reply is sent and the consumer strategy
/// nacks the request without requeue.
pub struct RpcResponder<R, F> {
    /// Weak, the responder is stored by the channel as part of its consumer.
    channel: Weak<SharedChannel>,
    serializer: Arc<dyn Serializer>,
    on_respond: F,
    serialize_exceptions: bool,
    response: PhantomData<fn() -> R>,
}

impl<R, F> RpcResponder<R, F>
where
    R: Serialize,
    F: Fn(MessageEnvelope, &MessageAck) -> Result<Response<R>> + Send + Sync,
{
    pub fn new(
        channel: Arc<SharedChannel>,
        serializer: Arc<dyn Serializer>,
        on_respond: F,
        serialize_exceptions: bool,
    ) -> Self {
        Self {
            channel: Arc::downgrade(&channel),
            serializer,
            on_respond,
            serialize_exceptions,
            response: PhantomData,
        }
    }
}

impl<R, F> MessageSink for RpcResponder<R, F>
where
    R: Serialize,
    F: Fn(MessageEnvelope, &MessageAck) -> Result<Response<R>> + Send + Sync,
{
    fn handle(&self, envelope: MessageEnvelope, ack: &MessageAck) -> Result<()> {
        let delivery_tag = envelope.delivery_tag();

        let (reply_to, correlation_id) = match (envelope.reply_to(), envelope.correlation_id()) {
            (Some(reply_to), Some(correlation_id)) if !reply_to.is_empty() && !correlation_id.is_empty() => {
                (reply_to.to_string(), correlation_id.to_string())
            }
            (reply_to, correlation_id) => {
                error!("Request {delivery_tag} cannot be answered, reply_to={reply_to:?} correlation_id={correlation_id:?}");

                return client_error!(
                    ErrorKind::UnroutableReply,
                    format!("request {delivery_tag} has no reply_to or correlation_id")
                );
            }
        };

        let channel = match self.channel.upgrade() {
            Some(channel) => channel,
            None => {
                return client_error!(
                    ErrorKind::Channel,
                    format!("channel is closed, request {delivery_tag} cannot be answered")
                )
            }
        };

        let mut properties = channel.create_properties()?;
        properties.correlation_id = Some(correlation_id);

        let body = match (self.on_respond)(envelope, ack) {
            Ok(Response::Raw(bytes)) => {
                properties.content_type = Some(RAW_CONTENT_TYPE.to_string());
                bytes
            }
            Ok(Response::Encoded(value)) => {
                properties.content_type = Some(self.serializer.content_type().to_string());
                serializer::serialize(self.serializer.as_ref(), &value)?
            }
            Err(e) if self.serialize_exceptions => {
                warn!("Handler failed on request {delivery_tag}, replying with fault: {e:#}");

                properties.content_type = Some(self.serializer.content_type().to_string());
                properties.headers.insert(FAULT_HEADER.to_string(), "true".to_string());
                serializer::serialize(self.serializer.as_ref(), &Fault::from(&e))?
            }
            Err(e) => return Err(handler_failure(e)),
        };

        channel.basic_publish("", &reply_to, properties, body)?;

        debug!("Reply to request {delivery_tag} is published to {reply_to:?}");

        Ok(())
    }
}
