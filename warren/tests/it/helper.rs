use std::sync::Arc;

use anyhow::Result;
use warren::memory::{Call, MemoryBroker};
use warren::{ClientError, Queue, QueueOptions, SharedChannel};

pub(crate) fn setup() -> (MemoryBroker, Arc<SharedChannel>) {
    warren::setup_logger();

    let broker = MemoryBroker::new();
    let channel = SharedChannel::new(broker.channel());

    (broker, channel)
}

pub(crate) fn declare(channel: &Arc<SharedChannel>, name: &str) -> Queue {
    Queue::declare(channel, name, QueueOptions::default()).unwrap()
}

/// The commands which settle deliveries.
pub(crate) fn settlements(broker: &MemoryBroker) -> Vec<Call> {
    broker
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::Ack { .. } | Call::Nack { .. }))
        .collect()
}

#[allow(dead_code)]
pub(crate) fn to_client_error<T: std::fmt::Debug>(result: Result<T>) -> ClientError {
    result.unwrap_err().downcast::<ClientError>().unwrap()
}
