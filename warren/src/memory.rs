//! In-memory broker.
//!
//! `MemoryBroker` implements the broker side of [`BrokerChannel`] without a network: queues bound
//! to the default exchange, consumers served round-robin, unacked delivery tracking and requeue.
//! It records every command it receives, so tests can check what the client sent.
//!
//! Deliveries are pushed by [`MemoryBroker::dispatch`] or injected with
//! [`MemoryBroker::deliver`]; both call the consumers outside of any lock, like a broker client's
//! delivery thread does.
//!
//! Dropping a [`MemoryChannel`] closes it: its consumers are cancelled and the deliveries they
//! left unacked go back to their queues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use anyhow::Result;
use log::{debug, warn};

use crate::channel::{BasicConsumer, BrokerChannel, QueueDeclareOk};
use crate::client_error;
use crate::error::ErrorKind;
use crate::message::{Delivery, MessageProperties};
use crate::model::{ChannelError, ConsumerTag, DeliveryTag};
use crate::queue::QueueOptions;

/// A command received by the broker.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Publish {
        exchange: String,
        routing_key: String,
        properties: MessageProperties,
        body: Vec<u8>,
    },
    Consume {
        queue: String,
        no_ack: bool,
        consumer_tag: ConsumerTag,
    },
    Cancel {
        consumer_tag: ConsumerTag,
    },
    Ack {
        delivery_tag: DeliveryTag,
        multiple: bool,
    },
    Nack {
        delivery_tag: DeliveryTag,
        multiple: bool,
        requeue: bool,
    },
    Declare {
        queue: String,
    },
    Purge {
        queue: String,
    },
    Delete {
        queue: String,
        if_unused: bool,
        if_empty: bool,
    },
}

/// One part of a published message as it is written to the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePart {
    Method,
    Header,
    Body,
}

/// A frame written by a publish, `publish` identifies the publish it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    pub publish: u64,
    pub part: FramePart,
}

#[derive(Clone, Debug)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    properties: MessageProperties,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct MemoryQueue {
    messages: VecDeque<StoredMessage>,
    /// Consumer tags in subscription order
    consumers: Vec<ConsumerTag>,
    next_consumer: usize,
}

type ChannelId = u64;

struct ConsumerEntry {
    channel: ChannelId,
    queue: String,
    no_ack: bool,
    consumer: Arc<dyn BasicConsumer>,
}

struct Unacked {
    /// 0 for the tags registered by `track_unacked`
    channel: ChannelId,
    queue: String,
    message: Option<StoredMessage>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, MemoryQueue>,
    consumers: HashMap<ConsumerTag, ConsumerEntry>,
    unacked: HashMap<DeliveryTag, Unacked>,
    next_delivery_tag: DeliveryTag,
    next_channel: ChannelId,
    next_publish: u64,
    calls: Vec<Call>,
    frames: Vec<Frame>,
}

/// Handle of the in-memory broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

/// A channel opened on a [`MemoryBroker`].
pub struct MemoryChannel {
    id: ChannelId,
    broker: MemoryBroker,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self) -> MemoryChannel {
        let mut state = self.lock();
        state.next_channel += 1;

        MemoryChannel {
            id: state.next_channel,
            broker: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        // No section leaves the state half updated, poisoning can be ignored.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Commands received so far, in arrival order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Publish frames written so far, in arrival order.
    pub fn frames(&self) -> Vec<Frame> {
        self.lock().frames.clone()
    }

    /// Bodies of the messages waiting in a queue.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map(|q| q.consumers.len()).unwrap_or(0)
    }

    /// Delivery tags sent out and not yet acked or nacked.
    pub fn unacked(&self) -> HashSet<DeliveryTag> {
        self.lock().unacked.keys().copied().collect()
    }

    /// Makes the broker expect an acknowledgement for a delivery tag it didn't send itself.
    pub fn track_unacked(&self, delivery_tag: DeliveryTag) {
        self.lock().unacked.insert(
            delivery_tag,
            Unacked {
                channel: 0,
                queue: String::new(),
                message: None,
            },
        );
    }

    /// Delivers a message to a consumer directly, with the delivery tag set by the caller, and
    /// returns what the consumer returned.
    pub fn deliver(&self, consumer_tag: &str, mut delivery: Delivery) -> Result<()> {
        let consumer = {
            let mut state = self.lock();

            let (channel, queue, no_ack, consumer) = match state.consumers.get(consumer_tag) {
                Some(entry) => (entry.channel, entry.queue.clone(), entry.no_ack, entry.consumer.clone()),
                None => {
                    return client_error!(
                        ErrorKind::Channel,
                        ChannelError::NotFound.into(),
                        format!("no consumer {consumer_tag}")
                    )
                }
            };

            if !no_ack {
                state.unacked.insert(
                    delivery.delivery_tag,
                    Unacked {
                        channel,
                        queue,
                        message: Some(StoredMessage {
                            exchange: delivery.exchange.clone(),
                            routing_key: delivery.routing_key.clone(),
                            properties: delivery.properties.clone(),
                            body: delivery.body.clone(),
                            redelivered: delivery.redelivered,
                        }),
                    },
                );
            }

            consumer
        };

        delivery.consumer_tag = consumer_tag.to_string();

        consumer.handle_delivery(delivery)
    }

    /// Delivers the waiting messages to the consumers of their queues until no queue has both
    /// messages and consumers. Returns the number of deliveries.
    pub fn dispatch(&self) -> usize {
        let mut delivered = 0;

        while let Some((consumer, delivery)) = self.next_delivery() {
            let delivery_tag = delivery.delivery_tag;

            if let Err(e) = consumer.handle_delivery(delivery) {
                warn!("Consumer failed to handle delivery {delivery_tag}: {e:#}");
            }

            delivered += 1;
        }

        delivered
    }

    fn next_delivery(&self) -> Option<(Arc<dyn BasicConsumer>, Delivery)> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let (queue_name, queue) = state
            .queues
            .iter_mut()
            .find(|(_, q)| !q.messages.is_empty() && !q.consumers.is_empty())?;

        let index = queue.next_consumer % queue.consumers.len();
        queue.next_consumer = index + 1;

        let consumer_tag = queue.consumers[index].clone();
        let message = queue.messages.pop_front()?;
        let queue_name = queue_name.clone();

        let entry = state.consumers.get(&consumer_tag)?;
        let consumer = entry.consumer.clone();
        let no_ack = entry.no_ack;
        let channel = entry.channel;

        state.next_delivery_tag += 1;
        let delivery_tag = state.next_delivery_tag;

        if !no_ack {
            state.unacked.insert(
                delivery_tag,
                Unacked {
                    channel,
                    queue: queue_name,
                    message: Some(message.clone()),
                },
            );
        }

        let delivery = Delivery {
            consumer_tag,
            delivery_tag,
            redelivered: message.redelivered,
            exchange: message.exchange,
            routing_key: message.routing_key,
            properties: message.properties,
            body: message.body,
        };

        Some((consumer, delivery))
    }

    fn write_frame(&self, publish: u64, part: FramePart) {
        self.lock().frames.push(Frame { publish, part });
    }
}

/// Removes acknowledged tags from the unacked set, the single tag or every tag up to it.
fn settle(state: &mut BrokerState, delivery_tag: DeliveryTag, multiple: bool) -> Result<Vec<Unacked>> {
    if multiple {
        let mut tags: Vec<_> = state.unacked.keys().filter(|t| **t <= delivery_tag).copied().collect();
        tags.sort_unstable();

        return Ok(tags.into_iter().filter_map(|t| state.unacked.remove(&t)).collect());
    }

    match state.unacked.remove(&delivery_tag) {
        Some(unacked) => Ok(vec![unacked]),
        None => client_error!(
            ErrorKind::Channel,
            ChannelError::PreconditionFailed.into(),
            format!("PRECONDITION_FAILED - unknown delivery tag {delivery_tag}")
        ),
    }
}

/// Puts the messages back to the head of their queues, keeping their original order.
fn requeue_all(state: &mut BrokerState, settled: Vec<Unacked>) {
    for unacked in settled.into_iter().rev() {
        if let (Some(mut message), Some(queue)) = (unacked.message, state.queues.get_mut(&unacked.queue)) {
            message.redelivered = true;
            queue.messages.push_front(message);
        }
    }
}

fn not_found<T>(queue: &str) -> Result<T> {
    client_error!(
        ErrorKind::Channel,
        ChannelError::NotFound.into(),
        format!("NOT_FOUND - no queue '{queue}'")
    )
}

impl BrokerChannel for MemoryChannel {
    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<()> {
        let publish = {
            let mut state = self.broker.lock();

            state.next_publish += 1;
            state.next_publish
        };

        // A publish is written as separate method, header and body frames. Concurrent writers on
        // one channel would interleave them.
        self.broker.write_frame(publish, FramePart::Method);
        thread::yield_now();
        self.broker.write_frame(publish, FramePart::Header);
        thread::yield_now();
        self.broker.write_frame(publish, FramePart::Body);

        let mut state = self.broker.lock();

        state.calls.push(Call::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties: properties.clone(),
            body: body.clone(),
        });

        if !exchange.is_empty() {
            return client_error!(
                ErrorKind::Channel,
                ChannelError::NotFound.into(),
                format!("NOT_FOUND - no exchange '{exchange}'")
            );
        }

        match state.queues.get_mut(routing_key) {
            Some(queue) => queue.messages.push_back(StoredMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                properties,
                body,
                redelivered: false,
            }),
            None => debug!("Message to {routing_key:?} is not routed"),
        }

        Ok(())
    }

    fn basic_consume(&mut self, queue: &str, no_ack: bool, consumer: Arc<dyn BasicConsumer>) -> Result<ConsumerTag> {
        let mut state = self.broker.lock();
        let consumer_tag = format!("warren-{}", rand::random::<u64>());

        state.calls.push(Call::Consume {
            queue: queue.to_string(),
            no_ack,
            consumer_tag: consumer_tag.clone(),
        });

        match state.queues.get_mut(queue) {
            Some(q) => q.consumers.push(consumer_tag.clone()),
            None => return not_found(queue),
        }

        state.consumers.insert(
            consumer_tag.clone(),
            ConsumerEntry {
                channel: self.id,
                queue: queue.to_string(),
                no_ack,
                consumer,
            },
        );

        Ok(consumer_tag)
    }

    fn basic_cancel(&mut self, consumer_tag: &str) -> Result<()> {
        let entry = {
            let mut state = self.broker.lock();

            state.calls.push(Call::Cancel {
                consumer_tag: consumer_tag.to_string(),
            });

            let entry = state.consumers.remove(consumer_tag);

            if let Some(entry) = &entry {
                if let Some(q) = state.queues.get_mut(&entry.queue) {
                    q.consumers.retain(|t| t != consumer_tag);
                }
            }

            entry
        };

        match entry {
            Some(entry) => {
                entry.consumer.handle_cancel(consumer_tag);
                Ok(())
            }
            None => client_error!(
                ErrorKind::Channel,
                ChannelError::NotFound.into(),
                format!("NOT_FOUND - no consumer '{consumer_tag}'")
            ),
        }
    }

    fn basic_ack(&mut self, delivery_tag: DeliveryTag, multiple: bool) -> Result<()> {
        let mut state = self.broker.lock();

        state.calls.push(Call::Ack { delivery_tag, multiple });
        settle(&mut state, delivery_tag, multiple)?;

        Ok(())
    }

    fn basic_nack(&mut self, delivery_tag: DeliveryTag, multiple: bool, requeue: bool) -> Result<()> {
        let mut state = self.broker.lock();

        state.calls.push(Call::Nack {
            delivery_tag,
            multiple,
            requeue,
        });

        let settled = settle(&mut state, delivery_tag, multiple)?;

        if requeue {
            requeue_all(&mut state, settled);
        }

        Ok(())
    }

    fn queue_declare(&mut self, queue: &str, _options: &QueueOptions) -> Result<QueueDeclareOk> {
        let mut state = self.broker.lock();

        let name = if queue.is_empty() {
            format!("amq.gen-{:016x}", rand::random::<u64>())
        } else {
            queue.to_string()
        };

        state.calls.push(Call::Declare { queue: name.clone() });

        let q = state.queues.entry(name.clone()).or_default();

        Ok(QueueDeclareOk {
            queue_name: name,
            message_count: q.messages.len() as u32,
            consumer_count: q.consumers.len() as u32,
        })
    }

    fn queue_purge(&mut self, queue: &str) -> Result<u32> {
        let mut state = self.broker.lock();

        state.calls.push(Call::Purge {
            queue: queue.to_string(),
        });

        match state.queues.get_mut(queue) {
            Some(q) => {
                let count = q.messages.len() as u32;
                q.messages.clear();
                Ok(count)
            }
            None => not_found(queue),
        }
    }

    fn queue_delete(&mut self, queue: &str, if_unused: bool, if_empty: bool) -> Result<u32> {
        let (count, cancelled) = {
            let mut state = self.broker.lock();

            state.calls.push(Call::Delete {
                queue: queue.to_string(),
                if_unused,
                if_empty,
            });

            let q = match state.queues.get(queue) {
                Some(q) => q,
                None => return not_found(queue),
            };

            if if_unused && !q.consumers.is_empty() {
                return client_error!(
                    ErrorKind::Channel,
                    ChannelError::PreconditionFailed.into(),
                    format!("PRECONDITION_FAILED - queue '{queue}' in use")
                );
            }

            if if_empty && !q.messages.is_empty() {
                return client_error!(
                    ErrorKind::Channel,
                    ChannelError::PreconditionFailed.into(),
                    format!("PRECONDITION_FAILED - queue '{queue}' not empty")
                );
            }

            let removed = state.queues.remove(queue).unwrap_or_default();
            let cancelled: Vec<_> = removed
                .consumers
                .iter()
                .filter_map(|tag| state.consumers.remove(tag).map(|entry| (tag.clone(), entry)))
                .collect();

            (removed.messages.len() as u32, cancelled)
        };

        for (tag, entry) in cancelled {
            entry.consumer.handle_cancel(&tag);
        }

        Ok(count)
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        let cancelled = {
            let mut state = self.broker.lock();

            let tags: Vec<_> = state
                .consumers
                .iter()
                .filter(|(_, entry)| entry.channel == self.id)
                .map(|(tag, _)| tag.clone())
                .collect();

            let mut cancelled = Vec::with_capacity(tags.len());

            for tag in tags {
                if let Some(entry) = state.consumers.remove(&tag) {
                    if let Some(q) = state.queues.get_mut(&entry.queue) {
                        q.consumers.retain(|t| *t != tag);
                    }

                    cancelled.push((tag, entry.consumer));
                }
            }

            let mut orphans: Vec<_> = state
                .unacked
                .iter()
                .filter(|(_, unacked)| unacked.channel == self.id)
                .map(|(tag, _)| *tag)
                .collect();
            orphans.sort_unstable();

            let orphans = orphans.into_iter().filter_map(|t| state.unacked.remove(&t)).collect();
            requeue_all(&mut state, orphans);

            cancelled
        };

        debug!("Channel {} is closed, cancelling {} consumers", self.id, cancelled.len());

        for (tag, consumer) in cancelled {
            consumer.handle_cancel(&tag);
        }
    }
}
