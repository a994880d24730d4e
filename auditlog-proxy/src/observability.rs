//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

use crate::{
    config::{LogConfig, LogFormat},
    error::Result,
};

/// Initialize the global tracing subscriber
///
/// An invalid level falls back to `info`. Calling this twice is harmless; the
/// second subscriber is not installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }

    tracing::info!(
        level = %config.level,
        format = ?config.format,
        "Tracing initialized for auditlog-proxy"
    );

    Ok(())
}
