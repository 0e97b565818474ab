use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

use crate::model::{ConsumerTag, DeliveryTag};

/// Header which marks a reply carrying a [`Fault`] instead of a response.
pub const FAULT_HEADER: &str = "x-fault";

/// Standard set of message properties.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: HashMap<String, String>,
    /// 1 - non-persistent, 2 - persistent
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub message_type: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
}

impl MessageProperties {
    pub fn correlation_id(mut self, value: &str) -> Self {
        self.correlation_id = Some(value.to_string());
        self
    }

    pub fn reply_to(mut self, value: &str) -> Self {
        self.reply_to = Some(value.to_string());
        self
    }

    pub fn content_type(mut self, value: &str) -> Self {
        self.content_type = Some(value.to_string());
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    /// True if the message is a reply carrying a [`Fault`].
    pub fn is_fault(&self) -> bool {
        self.headers.get(FAULT_HEADER).is_some_and(|v| v == "true")
    }
}

/// A message as the broker delivers it to a consumer.
///
/// With the `delivery_tag` a client can send back acknowledgements to the server, saying that the
/// message was successfully arrived.
#[derive(Clone, Debug, Default)]
pub struct Delivery {
    pub consumer_tag: ConsumerTag,
    pub delivery_tag: DeliveryTag,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

/// A delivered message with its decoded payload and the broker metadata. The envelope cannot be
/// changed once it is built, only transformed into a new one with [`MessageEnvelope::try_map`].
#[derive(Clone, Debug)]
pub struct MessageEnvelope<T = Vec<u8>> {
    payload: T,
    properties: MessageProperties,
    delivery_tag: DeliveryTag,
    consumer_tag: ConsumerTag,
    redelivered: bool,
    exchange: String,
    routing_key: String,
}

impl<T> MessageEnvelope<T> {
    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }

    pub fn delivery_tag(&self) -> DeliveryTag {
        self.delivery_tag
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.properties.correlation_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.properties.reply_to.as_deref()
    }

    /// Builds an envelope with the same metadata around the converted payload.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<MessageEnvelope<U>, E> {
        Ok(MessageEnvelope {
            payload: f(self.payload)?,
            properties: self.properties,
            delivery_tag: self.delivery_tag,
            consumer_tag: self.consumer_tag,
            redelivered: self.redelivered,
            exchange: self.exchange,
            routing_key: self.routing_key,
        })
    }
}

impl From<Delivery> for MessageEnvelope {
    fn from(value: Delivery) -> Self {
        Self {
            payload: value.body,
            properties: value.properties,
            delivery_tag: value.delivery_tag,
            consumer_tag: value.consumer_tag,
            redelivered: value.redelivered,
            exchange: value.exchange,
            routing_key: value.routing_key,
        }
    }
}

/// What a responder sends back to the requester.
#[derive(Clone, Debug, PartialEq)]
pub enum Response<R> {
    /// Published as is, the serializer is not involved.
    Raw(Vec<u8>),
    /// Encoded with the serializer of the subscription.
    Encoded(R),
}

impl Response<()> {
    /// Raw response when the handler has nothing to encode.
    pub fn bytes(body: impl Into<Vec<u8>>) -> Self {
        Response::Raw(body.into())
    }
}

/// Reply payload produced from a failed handler when the subscription serializes exceptions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fault {
    pub message: String,
    #[serde(default)]
    pub causes: Vec<String>,
}

impl From<&anyhow::Error> for Fault {
    fn from(err: &anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            causes: err.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }
}
