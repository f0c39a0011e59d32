//! Tracing bootstrap: console plus an optional daily rolling file.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "sume-chat.log";

/// Filter from `RUST_LOG`, falling back to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Console output goes to stderr so it does
/// not interleave with chat lines on stdout.
///
/// Keep the returned guard alive for the life of the process when a log
/// directory is given, or buffered file lines are lost. Calling this twice is
/// harmless: the second subscriber is ignored.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false);

    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(console)
                .with(fmt::layer().with_writer(file_writer).with_ansi(false))
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(console)
                .try_init();
            None
        }
    }
}
