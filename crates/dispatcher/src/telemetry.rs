//! Tracing subscriber installation.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{DispatcherConfig, LogFormat};
use crate::{DispatcherError, Result};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` in the environment takes precedence over the configured level.
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &DispatcherConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    }
    .map_err(|e| DispatcherError::Telemetry(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        format = ?config.log_format,
        "Tracing initialised"
    );
    Ok(())
}
