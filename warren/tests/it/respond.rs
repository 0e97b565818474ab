use anyhow::{anyhow, Result};
use serde_derive::{Deserialize, Serialize};
use warren::memory::Call;
use warren::{ConsumerOptions, ConsumerStrategy, Fault, MessageEnvelope, MessageProperties, Response};

use super::helper;

fn replies(broker: &warren::memory::MemoryBroker, queue: &str) -> Vec<(MessageProperties, Vec<u8>)> {
    broker
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Publish {
                routing_key,
                properties,
                body,
                ..
            } if routing_key == queue => Some((properties, body)),
            _ => None,
        })
        .collect()
}

#[test]
fn ping_pong() -> Result<()> {
    let (broker, channel) = helper::setup();
    let requests = helper::declare(&channel, "ping");
    let reply_queue = helper::declare(&channel, "q1");

    requests.respond_raw(
        |envelope, ack| {
            assert_eq!(envelope.payload(), b"ping");
            ack.ack()?;
            Ok(Response::bytes("pong"))
        },
        ConsumerOptions::default(),
    )?;

    requests.publish(
        MessageProperties::default().correlation_id("abc").reply_to("q1"),
        b"ping".to_vec(),
    )?;
    broker.dispatch();

    let replies = replies(&broker, "q1");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0.correlation_id.as_deref(), Some("abc"));
    assert_eq!(replies[0].1, b"pong");

    assert_eq!(broker.messages(reply_queue.name()), vec![b"pong".to_vec()]);
    assert_eq!(
        helper::settlements(&broker),
        vec![Call::Ack {
            delivery_tag: 1,
            multiple: false
        }]
    );

    Ok(())
}

#[test]
fn ping_pong_encoded() -> Result<()> {
    let (broker, channel) = helper::setup();
    let requests = helper::declare(&channel, "ping");
    helper::declare(&channel, "q1");

    requests.respond_raw(
        |_, ack| {
            ack.ack()?;
            Ok(Response::Encoded("pong"))
        },
        ConsumerOptions::default(),
    )?;

    requests.publish(
        MessageProperties::default().correlation_id("abc").reply_to("q1"),
        b"ping".to_vec(),
    )?;
    broker.dispatch();

    let replies = replies(&broker, "q1");
    assert_eq!(replies.len(), 1);

    let (properties, body) = &replies[0];
    assert_eq!(properties.correlation_id.as_deref(), Some("abc"));
    assert_eq!(properties.content_type.as_deref(), Some("application/json"));
    assert_eq!(body, b"\"pong\"");

    Ok(())
}

#[derive(Debug, Deserialize)]
struct Quote {
    symbol: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Price {
    symbol: String,
    cents: u64,
}

#[test]
fn typed_responder_on_pull_strategy() -> Result<()> {
    let (broker, channel) = helper::setup();
    let requests = helper::declare(&channel, "quotes");
    let reply_queue = helper::declare(&channel, "");

    requests.respond(
        |envelope: MessageEnvelope<Quote>, ack| {
            ack.ack()?;

            Ok(Price {
                symbol: envelope.payload().symbol.clone(),
                cents: 1999,
            })
        },
        ConsumerOptions::default().strategy(ConsumerStrategy::Pull),
    )?;

    requests.publish(
        MessageProperties::default()
            .correlation_id("q-1")
            .reply_to(reply_queue.name()),
        br#"{"symbol":"ACME"}"#.to_vec(),
    )?;
    broker.dispatch();

    // The pull pump answers on its own thread.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while broker.messages(reply_queue.name()).is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    let (properties, body) = replies(&broker, reply_queue.name()).remove(0);
    let price: Price = serde_json::from_slice(&body)?;

    assert_eq!(properties.content_type.as_deref(), Some("application/json"));
    assert_eq!(properties.correlation_id.as_deref(), Some("q-1"));
    assert_eq!(
        price,
        Price {
            symbol: "ACME".into(),
            cents: 1999
        }
    );

    Ok(())
}

#[test]
fn failing_handler_replies_with_fault() -> Result<()> {
    let (broker, channel) = helper::setup();
    let requests = helper::declare(&channel, "ping");
    helper::declare(&channel, "q1");

    requests.respond_raw(
        |_, ack| -> Result<Response<()>> {
            ack.nack(false)?;
            Err(anyhow!("ping is out of service"))
        },
        ConsumerOptions::default().serialize_exceptions(true),
    )?;

    requests.publish(
        MessageProperties::default().correlation_id("abc").reply_to("q1"),
        b"ping".to_vec(),
    )?;
    broker.dispatch();

    let (properties, body) = replies(&broker, "q1").remove(0);
    let fault: Fault = serde_json::from_slice(&body)?;

    assert!(properties.is_fault());
    assert_eq!(fault.message, "ping is out of service");
    assert_eq!(helper::settlements(&broker).len(), 1);

    Ok(())
}

#[test]
fn failing_handler_without_fault_replies() -> Result<()> {
    let (broker, channel) = helper::setup();
    let requests = helper::declare(&channel, "ping");
    helper::declare(&channel, "q1");

    requests.respond_raw(
        |_, _| -> Result<Response<()>> { Err(anyhow!("boom")) },
        ConsumerOptions::default(),
    )?;

    requests.publish(
        MessageProperties::default().correlation_id("abc").reply_to("q1"),
        b"ping".to_vec(),
    )?;
    broker.dispatch();

    assert!(replies(&broker, "q1").is_empty());
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
fn request_without_correlation_id_is_rejected() -> Result<()> {
    let (broker, channel) = helper::setup();
    let requests = helper::declare(&channel, "ping");

    requests.respond_raw(
        |_, _| -> Result<Response<()>> { panic!("handler must not run") },
        ConsumerOptions::default().serialize_exceptions(true),
    )?;

    requests.publish(MessageProperties::default().reply_to("q1"), b"ping".to_vec())?;
    broker.dispatch();

    assert!(replies(&broker, "q1").is_empty());
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
