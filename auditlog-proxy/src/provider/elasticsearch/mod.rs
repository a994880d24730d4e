//! Search-index provider backed by the Elasticsearch bulk API
//!
//! Each webhook request becomes exactly one bulk request; nothing is coalesced
//! across requests. The backend is either configured explicitly or discovered
//! in the cluster namespace during [`Provider::reconcile`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::{BackendConfig, ClusterAware, Provider, Reconciled};
use crate::audit::EventList;
use crate::cluster::ClusterLookup;
use crate::error::ProviderError;

pub mod bulk;

/// Index used when the configuration names none
pub const DEFAULT_INDEX: &str = "auditlog";

/// In-cluster service exposing the store
pub const SERVICE_NAME: &str = "elasticsearch-logging";

/// Named port of [`SERVICE_NAME`] serving the HTTP API
pub const SERVICE_PORT_NAME: &str = "db";

/// Secret holding the store's ingress credentials
pub const CREDENTIALS_SECRET: &str = "logging-ingress-credentials";

fn default_index() -> String {
    DEFAULT_INDEX.to_string()
}

/// Backend configuration blob
///
/// Accepted as YAML or JSON. All fields are optional; a missing endpoint
/// means the store is discovered in the cluster.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Base URL of the store, e.g. `https://es.example.com:9200`
    #[serde(default)]
    pub endpoint: String,
    /// Basic auth user
    #[serde(default)]
    pub username: String,
    /// Basic auth password
    #[serde(default)]
    pub password: String,
    /// Target index
    #[serde(default = "default_index")]
    pub index: String,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            username: String::new(),
            password: String::new(),
            index: default_index(),
        }
    }
}

impl fmt::Debug for ElasticsearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("index", &self.index)
            .finish()
    }
}

impl ElasticsearchConfig {
    /// Parse a raw configuration blob
    ///
    /// An empty or whitespace-only blob yields the defaults.
    pub fn parse(raw: &[u8]) -> Result<Self, ProviderError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let mut config: Self = serde_yaml::from_slice(raw)
            .map_err(|e| ProviderError::InvalidConfig(e.to_string()))?;
        if config.index.is_empty() {
            config.index = default_index();
        }
        Ok(config)
    }

    /// URL of the bulk endpoint below [`Self::endpoint`]
    pub fn bulk_url(&self) -> Result<reqwest::Url, ProviderError> {
        let mut url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            ProviderError::InvalidConfig(format!("invalid endpoint {}: {}", self.endpoint, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                ProviderError::InvalidConfig(format!("endpoint {} cannot be a base", self.endpoint))
            })?
            .pop_if_empty()
            .push("_bulk");
        Ok(url)
    }
}

/// Provider writing events into an Elasticsearch index
pub struct ElasticsearchProvider {
    client: reqwest::Client,
    config: Option<ElasticsearchConfig>,
    cluster: Option<Arc<dyn ClusterLookup>>,
}

impl fmt::Debug for ElasticsearchProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchProvider")
            .field("config", &self.config)
            .field("cluster", &self.cluster.is_some())
            .finish()
    }
}

impl ElasticsearchProvider {
    /// Registry name
    pub const NAME: &'static str = "elasticsearch";

    /// Create an unconfigured provider
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ProviderError::Client)?;
        Ok(Self {
            client,
            config: None,
            cluster: None,
        })
    }

    /// Registry constructor
    pub fn construct() -> Result<Box<dyn Provider>, ProviderError> {
        Ok(Box::new(Self::new()?))
    }

    /// Injected configuration, if any
    pub fn config(&self) -> Option<&ElasticsearchConfig> {
        self.config.as_ref()
    }

    async fn send_bulk(
        &self,
        config: &ElasticsearchConfig,
        payload: Vec<u8>,
    ) -> Result<(), ProviderError> {
        let url = config.bulk_url()?;
        let url_display = url.to_string();

        let response = self
            .client
            .post(url)
            .basic_auth(&config.username, Some(&config.password))
            .header(reqwest::header::CONTENT_TYPE, bulk::CONTENT_TYPE)
            .header(reqwest::header::ACCEPT, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                url: url_display.clone(),
                source,
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|source| ProviderError::Transport {
                url: url_display.clone(),
                source,
            })?;

        if !bulk::is_success(status.as_u16()) {
            tracing::debug!(
                url = %url_display,
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&body),
                "Bulk request rejected"
            );
            return Err(ProviderError::Status {
                url: url_display,
                status: status.as_u16(),
            });
        }

        bulk::check_response(&body)
    }

    async fn discover(&self, namespace: &str) -> Result<ElasticsearchConfig, ProviderError> {
        let cluster = self.cluster.as_ref().ok_or_else(|| {
            ProviderError::Discovery("no cluster client available for discovery".to_string())
        })?;

        let port = cluster
            .service_port(namespace, SERVICE_NAME, SERVICE_PORT_NAME)
            .await?;
        let secret = cluster.secret_data(namespace, CREDENTIALS_SECRET).await?;

        let field = |key: &str| -> Result<String, ProviderError> {
            let value = secret.get(key).ok_or_else(|| {
                ProviderError::Discovery(format!(
                    "secret {}/{} has no {}",
                    namespace, CREDENTIALS_SECRET, key
                ))
            })?;
            String::from_utf8(value.clone()).map_err(|_| {
                ProviderError::Discovery(format!(
                    "secret {}/{} key {} is not valid UTF-8",
                    namespace, CREDENTIALS_SECRET, key
                ))
            })
        };

        Ok(ElasticsearchConfig {
            endpoint: format!("http://{}.{}:{}", SERVICE_NAME, namespace, port),
            username: field("username")?,
            password: field("password")?,
            index: DEFAULT_INDEX.to_string(),
        })
    }
}

#[async_trait]
impl Provider for ElasticsearchProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn log(&self, events: EventList) -> Result<(), ProviderError> {
        if events.is_empty() {
            return Ok(());
        }

        let config = self.config.as_ref().ok_or(ProviderError::NotConfigured)?;
        if config.endpoint.is_empty() {
            return Err(ProviderError::Discovery(
                "no endpoint configured and none discovered".to_string(),
            ));
        }

        let count = events.len();
        let payload = bulk::encode(&config.index, events)?;
        self.send_bulk(config, payload).await?;

        tracing::info!(events = count, index = %config.index, "Successfully ingested logs");
        Ok(())
    }

    async fn reconcile(&self, namespace: &str, raw_config: &[u8]) -> Result<Reconciled, ProviderError> {
        let mut config = ElasticsearchConfig::parse(raw_config)?;

        let provision_dashboard = if config.endpoint.is_empty() {
            let discovered = self.discover(namespace).await?;
            tracing::info!(
                namespace,
                endpoint = %discovered.endpoint,
                "Discovered in-cluster elasticsearch"
            );
            config.endpoint = discovered.endpoint;
            config.username = discovered.username;
            config.password = discovered.password;
            true
        } else {
            false
        };

        Ok(Reconciled {
            backend_config: serde_json::to_vec(&config)?,
            provision_dashboard,
        })
    }

    fn backend_config(&mut self) -> Option<&mut dyn BackendConfig> {
        Some(self)
    }

    fn cluster_aware(&mut self) -> Option<&mut dyn ClusterAware> {
        Some(self)
    }
}

impl BackendConfig for ElasticsearchProvider {
    fn inject_backend_config(&mut self, raw: &[u8]) -> Result<(), ProviderError> {
        self.config = Some(ElasticsearchConfig::parse(raw)?);
        Ok(())
    }
}

impl ClusterAware for ElasticsearchProvider {
    fn inject_cluster(&mut self, cluster: Arc<dyn ClusterLookup>) {
        self.cluster = Some(cluster);
    }
}
