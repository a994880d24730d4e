//! Read-only access to the seed cluster for backend discovery
//!
//! Providers that can locate their backend inside the cluster accept a
//! [`ClusterLookup`] through the [`ClusterAware`](crate::provider::ClusterAware)
//! capability. [`InClusterClient`] talks to the Kubernetes API with the pod's
//! service account.

use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ProviderError;

/// Service account token mounted into every pod
pub const TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Cluster CA bundle mounted into every pod
pub const CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Lookups a provider may perform to discover its backend
#[async_trait]
pub trait ClusterLookup: Send + Sync {
    /// Port number of the named port of a service
    async fn service_port(
        &self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> Result<u16, ProviderError>;

    /// Decoded data of a secret
    async fn secret_data(
        &self,
        namespace: &str,
        secret: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, ProviderError>;
}

#[derive(Deserialize)]
struct Service {
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Default, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Deserialize)]
struct ServicePort {
    #[serde(default)]
    name: String,
    port: u16,
}

#[derive(Deserialize)]
struct Secret {
    #[serde(default)]
    data: BTreeMap<String, String>,
}

/// Minimal Kubernetes API client for service and secret reads
#[derive(Clone)]
pub struct InClusterClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for InClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InClusterClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl InClusterClient {
    /// Create a client for an explicit API server URL and bearer token
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(ProviderError::Client)?;
        Ok(Self::with_client(client, base_url, token))
    }

    fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Create a client from the in-cluster environment
    ///
    /// Requires `KUBERNETES_SERVICE_HOST`/`KUBERNETES_SERVICE_PORT` and the
    /// mounted service account token and CA.
    pub fn from_environment() -> Result<Self, ProviderError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            ProviderError::Discovery("KUBERNETES_SERVICE_HOST is not set".to_string())
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let host = if host.contains(':') {
            format!("[{}]", host)
        } else {
            host
        };

        let token = read_file(Path::new(TOKEN_PATH))?;
        let ca = std::fs::read(CA_PATH).map_err(|e| {
            ProviderError::Discovery(format!("unable to read cluster CA {}: {}", CA_PATH, e))
        })?;
        let ca = reqwest::Certificate::from_pem(&ca).map_err(ProviderError::Client)?;

        let client = reqwest::Client::builder()
            .add_root_certificate(ca)
            .build()
            .map_err(ProviderError::Client)?;

        Ok(Self::with_client(
            client,
            format!("https://{}:{}", host, port),
            token.trim(),
        ))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::Discovery(format!("unable to find {}", what)));
        }
        if !status.is_success() {
            return Err(ProviderError::Discovery(format!(
                "unable to get {}: status code {}",
                what,
                status.as_u16()
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl ClusterLookup for InClusterClient {
    async fn service_port(
        &self,
        namespace: &str,
        service: &str,
        port_name: &str,
    ) -> Result<u16, ProviderError> {
        let what = format!("service {}/{}", namespace, service);
        let svc: Service = self
            .get(
                &format!("/api/v1/namespaces/{}/services/{}", namespace, service),
                &what,
            )
            .await?;

        svc.spec
            .ports
            .iter()
            .find(|p| p.name == port_name)
            .map(|p| p.port)
            .ok_or_else(|| {
                ProviderError::Discovery(format!("unable to find port for {} in {}", port_name, what))
            })
    }

    async fn secret_data(
        &self,
        namespace: &str,
        secret: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, ProviderError> {
        let what = format!("secret {}/{}", namespace, secret);
        let sec: Secret = self
            .get(
                &format!("/api/v1/namespaces/{}/secrets/{}", namespace, secret),
                &what,
            )
            .await?;

        sec.data
            .into_iter()
            .map(|(key, value)| {
                base64::engine::general_purpose::STANDARD
                    .decode(value.as_bytes())
                    .map(|decoded| (key.clone(), decoded))
                    .map_err(|e| {
                        ProviderError::InvalidResponse(format!("{} key {}: {}", what, key, e))
                    })
            })
            .collect()
    }
}

fn read_file(path: &Path) -> Result<String, ProviderError> {
    std::fs::read_to_string(path).map_err(|e| {
        ProviderError::Discovery(format!("unable to read {}: {}", path.display(), e))
    })
}
