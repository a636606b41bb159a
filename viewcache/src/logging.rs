//! Logging setup.
//!
//! Structured `tracing` output to stdout, with an optional non-blocking file
//! writer. Configurable via the `RUST_LOG` environment variable; defaults to
//! `info`.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log file name used when a log directory is given.
pub const LOG_FILE_NAME: &str = "viewcache.log";

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes and closes the log file.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// With `log_dir`, events are written both to stdout and to
/// `{log_dir}/viewcache.log` (directory created if needed, ANSI stripped in
/// the file). Without it, stdout only.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created.
///
/// Panics if a global subscriber is already installed, like any
/// `tracing-subscriber` init; call once at process start.
pub fn init_logging(log_dir: Option<&Path>) -> Result<LoggingGuard, io::Error> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;

            let file_appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
            let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();

            Ok(LoggingGuard {
                _file_guard: Some(file_guard),
            })
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .init();

            Ok(LoggingGuard { _file_guard: None })
        }
    }
}
