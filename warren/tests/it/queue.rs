use anyhow::Result;
use warren::memory::Call;
use warren::{ConsumerOptions, ErrorKind, IfEmpty, IfUnused, MessageProperties, Queue, QueueOptions};

use super::helper;

#[test]
fn declare_reports_the_queue_state() -> Result<()> {
    let (_broker, channel) = helper::setup();

    let queue = Queue::declare(&channel, "orders", QueueOptions::default().durable(true))?;
    queue.publish(MessageProperties::default(), b"1".to_vec())?;
    queue.consume_raw(|_, ack| ack.ack(), ConsumerOptions::default())?;

    let again = Queue::declare(&channel, "orders", QueueOptions::default().passive(true))?;

    assert_eq!(again.name(), "orders");
    assert_eq!(again.message_count(), 1);
    assert_eq!(again.consumer_count(), 1);
    assert!(queue.options().durable);
    assert_eq!(format!("{again:?}").split(' ').next(), Some("Queue"));

    Ok(())
}

#[test]
fn server_named_queue() -> Result<()> {
    let (_broker, channel) = helper::setup();

    let queue = Queue::declare(&channel, "", QueueOptions::default().exclusive(true).auto_delete(true))?;

    assert!(queue.name().starts_with("amq.gen-"));

    Ok(())
}

#[test]
fn purge_and_delete() -> Result<()> {
    let (broker, channel) = helper::setup();
    let queue = helper::declare(&channel, "backlog");

    for i in 0..3u8 {
        queue.publish(MessageProperties::default(), vec![i])?;
    }

    assert_eq!(queue.purge()?, 3);

    queue.publish(MessageProperties::default(), b"x".to_vec())?;

    let err = helper::to_client_error(queue.delete_if(IfUnused(false), IfEmpty(true)));
    assert_eq!(err.kind, ErrorKind::Channel);
    assert_eq!(err.code, 406);

    assert_eq!(queue.delete()?, 1);
    assert!(broker.calls().contains(&Call::Delete {
        queue: "backlog".into(),
        if_unused: false,
        if_empty: false
    }));

    let err = helper::to_client_error(queue.purge());
    assert_eq!(err.code, 404);

    Ok(())
}

#[test]
fn delete_if_unused_refuses_consumed_queue() -> Result<()> {
    let (_broker, channel) = helper::setup();
    let queue = helper::declare(&channel, "busy");

    let mut subscription = queue.consume_raw(|_, ack| ack.ack(), ConsumerOptions::default())?;

    let err = helper::to_client_error(queue.delete_if(IfUnused(true), IfEmpty(false)));
    assert_eq!(err.code, 406);

    subscription.cancel()?;
    queue.delete_if(IfUnused(true), IfEmpty(false))?;

    Ok(())
}

#[test]
fn publish_to_unknown_exchange_fails() {
    let (_broker, channel) = helper::setup();

    let err = helper::to_client_error(channel.basic_publish("prices", "x", MessageProperties::default(), vec![]));

    assert_eq!(err.kind, ErrorKind::Channel);
    assert_eq!(err.code, 404);
}
