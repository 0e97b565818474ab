use std::fmt;
use std::io::Write;
use std::thread;

use env_logger::{Builder, Env};
use log::Level;

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "warren=info";

/// Installs a logger reading the filter from `RUST_LOG`. Calling it more than once is harmless.
///
/// Lines carry the name of the logging thread, so the work of the pull pumps
/// (`warren-pump-<queue>`) can be told apart from the delivery thread of the broker client.
pub fn setup_logger() {
    let _ = Builder::from_env(Env::default().default_filter_or(DEFAULT_FILTER))
        .format(|buf, record| {
            let current = thread::current();

            writeln!(
                buf,
                "{} {}",
                buf.timestamp_millis(),
                log_line(current.name(), record.level(), record.target(), record.args())
            )
        })
        .try_init();
}

fn log_line(thread: Option<&str>, level: Level, target: &str, message: &fmt::Arguments<'_>) -> String {
    format!("[{level:<5}] <{}> {target}: {message}", thread.unwrap_or("unnamed"))
}
