//! Payload codecs.
//!
//! A [`Serializer`] converts between bytes and a `serde_json::Value` tree, which keeps the trait
//! object safe, so consumer options and queues can carry an `Arc<dyn Serializer>`. Typed values go
//! through [`serialize`] and [`deserialize`].

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::client_error;
use crate::error::ErrorKind;

pub trait Serializer: fmt::Debug + Send + Sync {
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Value>;

    /// Content type set on the messages this serializer produces.
    fn content_type(&self) -> &str;
}

/// The default serializer.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match serde_json::to_vec(value) {
            Ok(bytes) => Ok(bytes),
            Err(e) => client_error!(ErrorKind::Serialization, format!("JSON encode: {e}")),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        match serde_json::from_slice(bytes) {
            Ok(value) => Ok(value),
            Err(e) => client_error!(ErrorKind::Serialization, format!("JSON decode: {e}")),
        }
    }

    fn content_type(&self) -> &str {
        "application/json"
    }
}

pub fn default_serializer() -> Arc<dyn Serializer> {
    Arc::new(JsonSerializer)
}

pub fn serialize<T: Serialize + ?Sized>(serializer: &dyn Serializer, value: &T) -> Result<Vec<u8>> {
    let tree = match serde_json::to_value(value) {
        Ok(tree) => tree,
        Err(e) => return client_error!(ErrorKind::Serialization, format!("cannot serialize value: {e}")),
    };

    serializer.encode(&tree)
}

pub fn deserialize<T: DeserializeOwned>(serializer: &dyn Serializer, bytes: &[u8]) -> Result<T> {
    let tree = serializer.decode(bytes)?;

    match serde_json::from_value(tree) {
        Ok(value) => Ok(value),
        Err(e) => client_error!(ErrorKind::Serialization, format!("cannot deserialize value: {e}")),
    }
}
