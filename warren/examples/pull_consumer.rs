use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::info;
use warren::memory::MemoryBroker;
use warren::{parse_config, MessageEnvelope, MessageProperties, Queue, SharedChannel};

const CONFIG: &str = r#"
[consumer]
strategy = "pull"

[queues.jobs]
durable = true
"#;

fn main() -> Result<()> {
    warren::setup_logger();

    let config = parse_config(CONFIG)?;

    let broker = MemoryBroker::new();
    let channel = SharedChannel::new(broker.channel());
    let queue = Queue::declare(&channel, "jobs", config.queue_options("jobs"))?;

    let done = Arc::new(AtomicU32::new(0));
    let counter = done.clone();

    let mut subscription = queue.consume(
        move |envelope: MessageEnvelope<u32>, ack| {
            let job = *envelope.payload();

            // Odd jobs are sent back once.
            if job % 2 == 1 && !envelope.redelivered() {
                info!("Job {job} is requeued");
                return ack.nack(true);
            }

            info!("Job {job} is done");
            counter.fetch_add(1, Ordering::SeqCst);
            ack.ack()
        },
        config.consumer.clone(),
    )?;

    for job in 0..10u32 {
        queue.publish(MessageProperties::default(), job.to_string().into_bytes())?;
    }

    while done.load(Ordering::SeqCst) < 10 {
        broker.dispatch();
        std::thread::sleep(Duration::from_millis(10));
    }

    subscription.cancel()?;

    Ok(())
}
