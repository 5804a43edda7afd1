//! Diagnostic logging setup.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, TaskwardenError};

/// Builds the level filter: `RUST_LOG` when set and valid, otherwise
/// `info` (or `debug` with `verbose`).
pub fn env_filter(verbose: bool) -> EnvFilter {
    let default = if verbose { "taskwarden=debug,info" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the global subscriber.
///
/// Logs go to stderr, keeping the child's stdout untouched, or are appended
/// to `log_file` without ANSI colors.
pub fn init(log_file: Option<&Path>, verbose: bool) -> Result<()> {
    let filter = env_filter(verbose);

    let installed = if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    installed.map_err(|e| TaskwardenError::Config(format!("cannot initialize logging: {e}")))
}
