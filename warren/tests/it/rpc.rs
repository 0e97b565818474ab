use std::thread;

use anyhow::{anyhow, Result};
use serde_derive::{Deserialize, Serialize};
use warren::{ConsumerOptions, ConsumerStrategy, ErrorKind, MessageEnvelope, QueueOptions, RpcClient};

use super::helper;

#[derive(Debug, Serialize, Deserialize)]
struct Transfer {
    from: String,
    to: String,
    amount: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Receipt {
    id: u64,
    amount: u64,
}

#[test]
fn request_reply_round_trip() -> Result<()> {
    let (broker, channel) = helper::setup();
    let requests = helper::declare(&channel, "transfers");
    let replies = warren::Queue::declare(&channel, "", QueueOptions::default().exclusive(true))?;

    requests.respond(
        |envelope: MessageEnvelope<Transfer>, ack| {
            ack.ack()?;

            let transfer = envelope.into_payload();
            if transfer.from == transfer.to {
                return Err(anyhow!("cannot transfer to the same account"));
            }

            Ok(Receipt {
                id: 1,
                amount: transfer.amount,
            })
        },
        ConsumerOptions::default()
            .strategy(ConsumerStrategy::Pull)
            .serialize_exceptions(true),
    )?;

    let client = RpcClient::new(&replies)?;

    let ok = client.call(
        "transfers",
        &Transfer {
            from: "alice".into(),
            to: "bob".into(),
            amount: 20,
        },
    )?;
    let refused = client.call(
        "transfers",
        &Transfer {
            from: "bob".into(),
            to: "bob".into(),
            amount: 5,
        },
    )?;

    // Replies published by the pump need another dispatch round.
    let dispatcher = {
        let broker = broker.clone();

        thread::spawn(move || {
            for _ in 0..500 {
                broker.dispatch();
                thread::sleep(std::time::Duration::from_millis(2));
            }
        })
    };

    assert_eq!(ok.wait_for::<Receipt>()?, Receipt { id: 1, amount: 20 });

    let err = helper::to_client_error(refused.wait_for::<Receipt>());
    assert_eq!(err.kind, ErrorKind::RemoteFault);
    assert_eq!(err.message, "cannot transfer to the same account");

    assert_eq!(client.pending_count(), 0);
    client.close()?;
    dispatcher.join().unwrap();

    Ok(())
}
