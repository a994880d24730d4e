//! Backend provider contract and registry
//!
//! A [`Provider`] forwards decoded audit events to one storage or reporting
//! backend. Providers are registered by name in a [`Registry`] that is built
//! once at startup and never mutated afterwards.
//!
//! Optional capabilities are separate traits a provider exposes through
//! [`Provider::backend_config`] and [`Provider::cluster_aware`]. The registry
//! checks for them exactly once, while building the provider, so a provider
//! handed out by [`Registry::build`] is always fully injected.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::EventList;
use crate::cluster::ClusterLookup;
use crate::error::{Error, ProviderError, Result};

pub mod elasticsearch;
pub mod standard;

pub use elasticsearch::{ElasticsearchConfig, ElasticsearchProvider};
pub use standard::StandardProvider;

/// A pluggable audit event backend
///
/// One instance serves the whole process and may be invoked concurrently.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique, stable name used for configuration lookup
    fn name(&self) -> &'static str;

    /// Forward every event of one request
    ///
    /// Either all events are accepted or an error describes what failed. An
    /// empty list is always a successful no-op.
    async fn log(&self, events: EventList) -> std::result::Result<(), ProviderError>;

    /// Resolve the backend configuration for a cluster namespace
    ///
    /// Called by the deployment controller before the proxy is (re)configured.
    /// The default passes the configuration through unchanged.
    async fn reconcile(
        &self,
        _namespace: &str,
        raw_config: &[u8],
    ) -> std::result::Result<Reconciled, ProviderError> {
        Ok(Reconciled {
            backend_config: raw_config.to_vec(),
            provision_dashboard: false,
        })
    }

    /// Backend configuration capability, if the provider takes configuration
    fn backend_config(&mut self) -> Option<&mut dyn BackendConfig> {
        None
    }

    /// Cluster client capability, if the provider can discover its backend
    fn cluster_aware(&mut self) -> Option<&mut dyn ClusterAware> {
        None
    }
}

/// Providers that accept a backend specific configuration blob
pub trait BackendConfig {
    /// Parse and store the raw configuration; the schema belongs to the provider
    fn inject_backend_config(&mut self, raw: &[u8]) -> std::result::Result<(), ProviderError>;
}

/// Providers that use a cluster client to discover their backend
pub trait ClusterAware {
    /// Store the client used for discovery
    fn inject_cluster(&mut self, cluster: Arc<dyn ClusterLookup>);
}

/// Outcome of [`Provider::reconcile`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Fully resolved configuration to hand to the proxy
    pub backend_config: Vec<u8>,
    /// Whether the dashboard deployment for the discovered store must be provisioned
    pub provision_dashboard: bool,
}

/// Inject `raw` if the provider accepts backend configuration
///
/// Returns `Ok(false)` when the provider has no such capability.
pub fn backend_config_into(
    raw: &[u8],
    provider: &mut dyn Provider,
) -> std::result::Result<bool, ProviderError> {
    match provider.backend_config() {
        Some(target) => target.inject_backend_config(raw).map(|_| true),
        None => Ok(false),
    }
}

/// Inject a cluster client if the provider can use one
pub fn cluster_into(cluster: Arc<dyn ClusterLookup>, provider: &mut dyn Provider) -> bool {
    match provider.cluster_aware() {
        Some(target) => {
            target.inject_cluster(cluster);
            true
        }
        None => false,
    }
}

/// Factory producing a fresh, uninjected provider
pub type ProviderConstructor = fn() -> std::result::Result<Box<dyn Provider>, ProviderError>;

/// Collaborators injected into a provider before first use
#[derive(Clone, Default)]
pub struct ProviderSetup<'a> {
    /// Raw backend configuration
    pub backend_config: &'a [u8],
    /// Cluster client for backend discovery
    pub cluster: Option<Arc<dyn ClusterLookup>>,
}

impl<'a> ProviderSetup<'a> {
    /// Setup with backend configuration only
    pub fn new(backend_config: &'a [u8]) -> Self {
        Self {
            backend_config,
            cluster: None,
        }
    }

    /// Add a cluster client
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterLookup>) -> Self {
        self.cluster = Some(cluster);
        self
    }
}

/// Name-keyed table of provider constructors
///
/// Immutable once built; lookups need no locking.
#[derive(Debug, Clone)]
pub struct Registry {
    constructors: HashMap<&'static str, ProviderConstructor>,
}

/// Builder for a [`Registry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    constructors: HashMap<&'static str, ProviderConstructor>,
}

impl RegistryBuilder {
    /// Register a constructor under `name`
    ///
    /// Names must be unique.
    pub fn register(mut self, name: &'static str, constructor: ProviderConstructor) -> Result<Self> {
        if self.constructors.contains_key(name) {
            return Err(Error::DuplicateProvider(name.to_string()));
        }
        self.constructors.insert(name, constructor);
        Ok(self)
    }

    /// Finish the registry
    pub fn build(self) -> Registry {
        Registry {
            constructors: self.constructors,
        }
    }
}

impl Registry {
    /// Start an empty registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry with every provider shipped in this crate
    pub fn with_builtin_providers() -> Result<Self> {
        Ok(Self::builder()
            .register(StandardProvider::NAME, StandardProvider::construct)?
            .register(ElasticsearchProvider::NAME, ElasticsearchProvider::construct)?
            .build())
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.constructors.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Construct a fresh, uninjected provider
    pub fn new_provider(&self, name: &str) -> Result<Box<dyn Provider>> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| Error::UnknownProvider(name.to_string()))?;
        constructor().map_err(|source| Error::Provider {
            provider: name.to_string(),
            source,
        })
    }

    /// Construct a provider and inject all of its collaborators
    ///
    /// This is the only way the proxy obtains a usable provider.
    pub fn build(&self, name: &str, setup: ProviderSetup<'_>) -> Result<Arc<dyn Provider>> {
        let mut provider = self.new_provider(name)?;

        let configured =
            backend_config_into(setup.backend_config, provider.as_mut()).map_err(|source| {
                Error::Provider {
                    provider: name.to_string(),
                    source,
                }
            })?;
        if !configured && !setup.backend_config.is_empty() {
            tracing::warn!(
                provider = name,
                "Provider takes no backend configuration, ignoring provider_config"
            );
        }

        if let Some(cluster) = setup.cluster {
            cluster_into(cluster, provider.as_mut());
        }

        Ok(Arc::from(provider))
    }
}
