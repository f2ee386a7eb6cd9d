//! Diagnostic logging setup.
//!
//! Library code only emits `tracing` events; binaries and embedders decide
//! whether to install a subscriber. The filter falls back to `RUST_LOG` and
//! then to `info`.

use std::io;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {message}")]
    InvalidFilter { filter: String, message: String },
    #[error("global subscriber already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Builds the event filter from an explicit directive string, `RUST_LOG`, or
/// the default, in that order.
pub fn build_filter(filter: Option<&str>) -> Result<EnvFilter, LoggingError> {
    match filter {
        Some(directives) => {
            EnvFilter::try_new(directives).map_err(|error| LoggingError::InvalidFilter {
                filter: directives.to_string(),
                message: error.to_string(),
            })
        }
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Installs a stderr fmt subscriber as the global default.
///
/// Stdout is left to the caller's own output.
pub fn init_logging(filter: Option<&str>) -> Result<(), LoggingError> {
    let env_filter = build_filter(filter)?;
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()?;

    Ok(())
}
