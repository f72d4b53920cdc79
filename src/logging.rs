//! Tracing setup.
//!
//! Log lines go to stdout through a compact formatter and are mirrored to the
//! file named in [`LoggingConfig`]. The file side uses a non-blocking writer
//! so pipeline workers never stall on log I/O; the guard returned by
//! [`init_tracing`] must stay alive for the process lifetime or buffered
//! lines are lost on shutdown.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

/// Install the global subscriber: a compact stdout layer, plus a file layer
/// when the configured log file can be opened. `RUST_LOG` controls filtering
/// and defaults to `info`. Returns the file writer's guard, or `None` when
/// the service runs stdout-only.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = fmt::layer().with_target(false).compact();
    let base = tracing_subscriber::registry().with(filter).with(stdout);

    match file_writer(&config.file) {
        Ok((writer, guard)) => {
            let file = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            base.with(file).init();
            Some(guard)
        }
        Err(error) => {
            base.init();
            tracing::warn!(
                path = %config.file.display(),
                error = %error,
                "Could not open log file; logging to stdout only"
            );
            None
        }
    }
}

/// Open `path` for appending, creating missing parent directories, and wrap
/// it in a non-blocking writer.
fn file_writer(path: &Path) -> std::io::Result<(NonBlocking, WorkerGuard)> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(tracing_appender::non_blocking(file))
}
