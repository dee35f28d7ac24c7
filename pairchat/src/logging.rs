//! File-based logging setup for host applications.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;

/// Initialize file-based logging.
///
/// Logs are written to a file, never stdout, so a host UI can own the
/// terminal. Returns a [`WorkerGuard`] that must be held until shutdown to
/// ensure all buffered log entries are flushed. `RUST_LOG` overrides the
/// given level when set.
pub fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("pairchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
