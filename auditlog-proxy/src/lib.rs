//! # auditlog-proxy
//!
//! Audit event sink for Kubernetes API servers. The API server's webhook audit
//! backend POSTs `audit.k8s.io` event lists to this proxy, which forwards them
//! to one pluggable backend provider.
//!
//! ## Features
//!
//! - **Providers**: `standard` (structured log records) and `elasticsearch`
//!   (one bulk request per delivery, aggregated per-document failures)
//! - **Webhook server**: plaintext and TLS listeners, `/healthz`, request ids,
//!   graceful shutdown with a bounded grace period
//! - **Trust material**: self-signed RSA certificates for the webhook channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use auditlog_proxy::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config.log)?;
//!
//!     let registry = Registry::with_builtin_providers()?;
//!     let sink = Sink::new(&registry, AuditDecoder::audit(), &config)?;
//!
//!     let shutdown = CancellationToken::new();
//!     Server::new(config.webhook.clone(), sink).run(shutdown).await
//! }
//! ```

pub mod audit;
pub mod certificate;
pub mod cluster;
pub mod config;
pub mod error;
pub mod health;
pub mod middleware;
pub mod observability;
pub mod provider;
pub mod server;
pub mod sink;
pub mod tls;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{AuditDecoder, Event, EventList};
    pub use crate::certificate::{generate_for_service, generate_rsa_certificate, Certificate};
    pub use crate::cluster::{ClusterLookup, InClusterClient};
    pub use crate::config::{Config, LogConfig, TlsConfig, WebhookConfig};
    pub use crate::error::{Error, ProviderError, Result, SinkError};
    pub use crate::observability::init_tracing;
    pub use crate::provider::{
        ElasticsearchProvider, Provider, ProviderSetup, Reconciled, Registry, StandardProvider,
    };
    pub use crate::server::{shutdown_signal, BoundServer, Server};
    pub use crate::sink::Sink;

    pub use tokio_util::sync::CancellationToken;
}
