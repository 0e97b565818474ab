use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

use anyhow::Result;
use log::debug;
use tokio::sync::mpsc;

use super::{already_subscribed, dispatch, MessageProducer};
use crate::channel::{BasicConsumer, SharedChannel};
use crate::client_error;
use crate::error::ErrorKind;
use crate::message::Delivery;
use crate::sink::MessageSink;

/// Pull pump. The broker delivery thread only enqueues, a pump thread started by
/// [`MessageProducer::subscribe`] dequeues and calls the sink.
///
/// Cancelling the consumer closes the queue; the pump handles what is already queued and stops.
/// Closing the channel cancels its consumers, so the pump stops with it.
pub(crate) struct QueueingConsumer {
    channel: Weak<SharedChannel>,
    no_ack: bool,
    queue: String,
    sender: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
}

impl QueueingConsumer {
    pub(crate) fn new(channel: &Arc<SharedChannel>, no_ack: bool, queue: &str) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            channel: Arc::downgrade(channel),
            no_ack,
            queue: queue.to_string(),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

impl MessageProducer for QueueingConsumer {
    fn subscribe(&self, sink: Box<dyn MessageSink>) -> Result<()> {
        let mut receiver = match self.receiver.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some(receiver) => receiver,
            None => return already_subscribed(),
        };

        let channel = self.channel.clone();
        let no_ack = self.no_ack;
        let queue = self.queue.clone();

        thread::Builder::new()
            .name(format!("warren-pump-{}", self.queue))
            .spawn(move || {
                debug!("Pump of {queue:?} started");

                // Errors are logged and nacked by dispatch, the pump goes on with the next one.
                while let Some(delivery) = receiver.blocking_recv() {
                    let _ = dispatch(sink.as_ref(), &channel, no_ack, delivery);
                }

                debug!("Pump of {queue:?} stopped");
            })?;

        Ok(())
    }

    fn into_consumer(self: Arc<Self>) -> Arc<dyn BasicConsumer> {
        self
    }
}

impl BasicConsumer for QueueingConsumer {
    fn handle_delivery(&self, delivery: Delivery) -> Result<()> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);

        match sender.as_ref() {
            Some(tx) => match tx.send(delivery) {
                Ok(()) => Ok(()),
                Err(_) => client_error!(ErrorKind::InvalidState, "pump of the pull consumer is gone"),
            },
            None => client_error!(ErrorKind::InvalidState, "pull consumer is cancelled"),
        }
    }

    fn handle_cancel(&self, consumer_tag: &str) {
        debug!("Pull consumer {consumer_tag} is cancelled, closing its queue");

        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
