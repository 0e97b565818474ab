//! Configuration read from TOML.
//!
//! ```toml
//! [consumer]
//! no_ack = false
//! strategy = "pull"
//! serialize_exceptions = true
//!
//! [queues.rpc-requests]
//! durable = true
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde_derive::Deserialize;

use crate::consumer::ConsumerOptions;
use crate::queue::QueueOptions;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults of the consumer subscriptions.
    pub consumer: ConsumerOptions,
    /// Options of the queues by name.
    pub queues: HashMap<String, QueueOptions>,
}

impl Config {
    /// Options of a queue, the defaults if the queue is not configured.
    pub fn queue_options(&self, name: &str) -> QueueOptions {
        self.queues.get(name).cloned().unwrap_or_default()
    }
}

pub fn parse_config(text: &str) -> Result<Config> {
    Ok(toml::from_str(text)?)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let text = std::fs::read_to_string(path)?;

    parse_config(&text)
}
