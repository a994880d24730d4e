//! Audit sink bridging webhook requests to the configured provider

use axum::body::Body;
use std::sync::Arc;

use crate::audit::AuditDecoder;
use crate::config::Config;
use crate::error::{Result, SinkError};
use crate::provider::{Provider, ProviderSetup, Registry};

/// Decodes inbound event lists and hands them to one provider
///
/// Shared by every request; holds no per-request state.
#[derive(Clone)]
pub struct Sink {
    decoder: AuditDecoder,
    provider: Arc<dyn Provider>,
    body_limit: usize,
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("decoder", &self.decoder)
            .field("provider", &self.provider.name())
            .field("body_limit", &self.body_limit)
            .finish()
    }
}

impl Sink {
    /// Resolve and inject the configured provider
    ///
    /// Fails if the provider is unknown or rejects its configuration, so a
    /// misconfigured proxy never starts serving.
    pub fn new(registry: &Registry, decoder: AuditDecoder, config: &Config) -> Result<Self> {
        let raw = config.provider_config_bytes()?;
        let provider = registry.build(&config.provider, ProviderSetup::new(&raw))?;

        tracing::info!(provider = provider.name(), "Provider successfully loaded");

        Ok(Self::with_provider(
            provider,
            decoder,
            config.webhook.body_limit_bytes(),
        ))
    }

    /// Sink around an already injected provider
    pub fn with_provider(
        provider: Arc<dyn Provider>,
        decoder: AuditDecoder,
        body_limit: usize,
    ) -> Self {
        Self {
            decoder,
            provider,
            body_limit,
        }
    }

    /// Name of the provider events are forwarded to
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Read, decode and forward one request body
    ///
    /// The provider is only invoked for a fully read, successfully decoded body.
    pub async fn handle(&self, body: Body) -> std::result::Result<(), SinkError> {
        let bytes = axum::body::to_bytes(body, self.body_limit)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Unable to read body of request");
                SinkError::Read(e.to_string())
            })?;

        let events = self.decoder.decode(&bytes).map_err(|e| {
            tracing::error!(error = %e, "Unable to decode event list");
            SinkError::from(e)
        })?;

        let count = events.len();
        self.provider.log(events).await.map_err(|e| {
            tracing::error!(
                provider = self.provider.name(),
                events = count,
                error = %e,
                "Unable to log event list"
            );
            SinkError::from(e)
        })
    }
}
