use anyhow::Result;
use log::info;
use warren::memory::MemoryBroker;
use warren::{ConsumerOptions, MessageEnvelope, Queue, QueueOptions, RpcClient, SharedChannel};

fn main() -> Result<()> {
    warren::setup_logger();

    let broker = MemoryBroker::new();
    let channel = SharedChannel::new(broker.channel());

    let requests = Queue::declare(&channel, "uppercase", QueueOptions::default())?;
    let replies = Queue::declare(&channel, "", QueueOptions::default().exclusive(true))?;

    let mut responder = requests.respond(
        |envelope: MessageEnvelope<String>, ack| {
            ack.ack()?;

            if envelope.payload().is_empty() {
                anyhow::bail!("nothing to convert");
            }

            Ok(envelope.payload().to_uppercase())
        },
        ConsumerOptions::default().serialize_exceptions(true),
    )?;

    let client = RpcClient::new(&replies)?;

    let hello = client.call("uppercase", "hello")?;
    let empty = client.call("uppercase", "")?;

    broker.dispatch();

    info!("Reply: {}", hello.wait_for::<String>()?);

    match empty.wait_for::<String>() {
        Ok(reply) => info!("Unexpected reply {reply}"),
        Err(e) => info!("Remote fault: {e:#}"),
    }

    client.close()?;
    responder.cancel()?;

    Ok(())
}
