//! # Logging Setup
//!
//! Installs the process-wide `tracing` subscriber. Called once by the binary at
//! startup; libraries only emit events.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Error, Result};

/// Initialise logging from configuration. `RUST_LOG` overrides the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).try_init(),
    };

    installed.map_err(|e| Error::Configuration {
        message: format!("failed to install tracing subscriber: {}", e),
    })
}
