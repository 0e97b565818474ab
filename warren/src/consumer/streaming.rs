use std::sync::{Arc, OnceLock, Weak};

use anyhow::Result;
use log::debug;

use super::{already_subscribed, dispatch, MessageProducer};
use crate::channel::{BasicConsumer, SharedChannel};
use crate::client_error;
use crate::error::ErrorKind;
use crate::message::Delivery;
use crate::sink::MessageSink;

/// Push pump, the sink runs on the delivering thread.
pub(crate) struct StreamingConsumer {
    channel: Weak<SharedChannel>,
    no_ack: bool,
    sink: OnceLock<Box<dyn MessageSink>>,
}

impl StreamingConsumer {
    pub(crate) fn new(channel: &Arc<SharedChannel>, no_ack: bool) -> Self {
        Self {
            channel: Arc::downgrade(channel),
            no_ack,
            sink: OnceLock::new(),
        }
    }
}

impl MessageProducer for StreamingConsumer {
    fn subscribe(&self, sink: Box<dyn MessageSink>) -> Result<()> {
        if self.sink.set(sink).is_err() {
            return already_subscribed();
        }

        debug!("Sink subscribed to push consumer");

        Ok(())
    }

    fn into_consumer(self: Arc<Self>) -> Arc<dyn BasicConsumer> {
        self
    }
}

impl BasicConsumer for StreamingConsumer {
    fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        match self.sink.get() {
            Some(sink) => dispatch(sink.as_ref(), &self.channel, self.no_ack, delivery),
            None => client_error!(
                ErrorKind::InvalidState,
                format!("delivery {} arrived before a sink was subscribed", delivery.delivery_tag)
            ),
        }
    }

    fn handle_cancel(&self, consumer_tag: &str) {
        debug!("Push consumer {consumer_tag} is cancelled");
    }
}
