use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use serde_derive::Deserialize;
use warren::memory::Call;
use warren::{
    ConsumerOptions, ConsumerStrategy, Delivery, ErrorKind, MessageAck, MessageEnvelope, MessageProperties,
    SubscriptionState,
};

use super::helper;

#[test]
fn handler_acks_the_delivery_once() -> Result<()> {
    let (broker, channel) = helper::setup();
    let queue = helper::declare(&channel, "events");

    let kept: Arc<Mutex<Option<MessageAck>>> = Arc::default();
    let slot = kept.clone();

    let subscription = queue.consume_raw(
        move |_envelope, ack| {
            ack.ack()?;
            *slot.lock().unwrap() = Some(ack.clone());
            Ok(())
        },
        ConsumerOptions::default(),
    )?;

    let delivery = Delivery {
        delivery_tag: 42,
        routing_key: "events".into(),
        body: b"created".to_vec(),
        ..Default::default()
    };

    broker.deliver(subscription.consumer_tag(), delivery)?;

    // A second decision through a kept clone is refused and not sent.
    let ack = kept.lock().unwrap().take().unwrap();
    let err = helper::to_client_error(ack.ack());

    assert_eq!(err.kind, ErrorKind::InvalidState);
    assert_eq!(
        helper::settlements(&broker),
        vec![Call::Ack {
            delivery_tag: 42,
            multiple: false
        }]
    );

    Ok(())
}

#[derive(Debug, Deserialize, PartialEq)]
struct Reading {
    sensor: String,
    value: f64,
}

#[test]
fn typed_consumer_with_pull_strategy() -> Result<()> {
    let (broker, channel) = helper::setup();
    let queue = helper::declare(&channel, "readings");
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    queue.consume(
        move |envelope: MessageEnvelope<Reading>, ack| {
            ack.ack()?;
            tx.lock().unwrap().send(envelope.into_payload())?;
            Ok(())
        },
        ConsumerOptions::default().strategy(ConsumerStrategy::Pull),
    )?;

    for value in [1.5, 2.5] {
        queue.publish(
            MessageProperties::default().content_type("application/json"),
            format!(r#"{{"sensor":"t1","value":{value}}}"#).into_bytes(),
        )?;
    }

    broker.dispatch();

    let first = rx.recv_timeout(Duration::from_secs(5))?;
    let second = rx.recv_timeout(Duration::from_secs(5))?;

    assert_eq!(
        first,
        Reading {
            sensor: "t1".into(),
            value: 1.5
        }
    );
    assert_eq!(second.value, 2.5);

    Ok(())
}

#[test]
fn undecodable_message_is_rejected() -> Result<()> {
    let (broker, channel) = helper::setup();
    let queue = helper::declare(&channel, "readings");
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();

    queue.consume(
        move |_: MessageEnvelope<Reading>, ack| {
            counter.fetch_add(1, Ordering::SeqCst);
            ack.ack()
        },
        ConsumerOptions::default(),
    )?;

    queue.publish(MessageProperties::default(), b"not json".to_vec())?;
    broker.dispatch();

    assert_eq!(handled.load(Ordering::SeqCst), 0);
    assert_eq!(
        helper::settlements(&broker),
        vec![Call::Nack {
            delivery_tag: 1,
            multiple: false,
            requeue: false
        }]
    );

    Ok(())
}

#[test]
fn no_ack_consumer_never_settles() -> Result<()> {
    let (broker, channel) = helper::setup();
    let queue = helper::declare(&channel, "logs");

    queue.consume_raw(
        |_, ack| {
            ack.ack()?;
            ack.nack(true)
        },
        ConsumerOptions::default().no_ack(true),
    )?;

    queue.publish(MessageProperties::default(), b"line".to_vec())?;

    assert_eq!(broker.dispatch(), 1);
    assert!(helper::settlements(&broker).is_empty());
    assert!(broker.unacked().is_empty());

    Ok(())
}

#[test]
fn cancel_subscription() -> Result<()> {
    let (broker, channel) = helper::setup();
    let queue = helper::declare(&channel, "jobs");

    let mut subscription = queue.consume_raw(|_, ack| ack.ack(), ConsumerOptions::default())?;

    assert!(subscription.is_active());
    assert_eq!(broker.consumer_count("jobs"), 1);

    subscription.cancel()?;

    assert_eq!(subscription.state(), SubscriptionState::Cancelled);
    assert_eq!(broker.consumer_count("jobs"), 0);

    let err = helper::to_client_error(subscription.cancel());
    assert_eq!(err.kind, ErrorKind::InvalidState);

    queue.publish(MessageProperties::default(), b"late".to_vec())?;

    assert_eq!(broker.dispatch(), 0);
    assert_eq!(broker.messages("jobs"), vec![b"late".to_vec()]);

    Ok(())
}

#[test]
fn dropping_the_channel_stops_the_pump() -> Result<()> {
    let (broker, channel) = helper::setup();
    let queue = helper::declare(&channel, "jobs");
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let mut subscription = queue.consume_raw(
        move |envelope, ack| {
            ack.ack()?;
            tx.lock().unwrap().send(envelope.into_payload())?;
            Ok(())
        },
        ConsumerOptions::default().strategy(ConsumerStrategy::Pull),
    )?;

    queue.publish(MessageProperties::default(), b"first".to_vec())?;
    broker.dispatch();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5))?, b"first");

    let weak = Arc::downgrade(&channel);
    drop(queue);
    drop(channel);

    // The pump thread ends and drops the sink with the sender of the recording.
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)),
        Err(mpsc::RecvTimeoutError::Disconnected)
    );
    assert_eq!(weak.strong_count(), 0);
    assert_eq!(broker.consumer_count("jobs"), 0);

    let err = helper::to_client_error(subscription.cancel());
    assert_eq!(err.kind, ErrorKind::Channel);

    Ok(())
}

#[test]
fn consume_on_missing_queue_fails() {
    let (_broker, channel) = helper::setup();

    let err = helper::to_client_error(channel.basic_consume("", false, Arc::new(NoConsumer)));
    assert_eq!(err.kind, ErrorKind::ArgumentNull);

    let err = helper::to_client_error(channel.basic_consume("nowhere", false, Arc::new(NoConsumer)));
    assert_eq!(err.kind, ErrorKind::Channel);
    assert_eq!(err.code, 404);
}

struct NoConsumer;

impl warren::BasicConsumer for NoConsumer {
    fn handle_delivery(&self, _delivery: Delivery) -> Result<()> {
        Ok(())
    }
}
