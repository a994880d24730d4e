//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: AUDITLOG_, nested keys split on `__`)
//! 2. Configuration file (TOML, YAML or JSON, chosen by extension)
//! 3. Default values
//!
//! The file is taken from `AUDITLOG_PROXY_CONFIG` when set, otherwise the first
//! existing of `./config.yaml`, `./config.toml`, `/etc/auditlog-proxy/config.yaml`.

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "AUDITLOG_PROXY_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name of the backend provider events are forwarded to
    #[serde(default)]
    pub provider: String,

    /// Provider specific configuration, opaque to the proxy
    #[serde(default)]
    pub provider_config: Option<serde_json::Value>,

    /// Webhook transport configuration
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Webhook listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Plaintext port, always bound
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// TLS port, `0` disables the TLS listener
    #[serde(default)]
    pub https_port: u16,

    /// TLS material for the TLS listener
    #[serde(default)]
    pub tls: TlsConfig,

    /// Request body size limit in MB
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,

    /// Grace period granted to in-flight requests on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            https_port: 0,
            tls: TlsConfig::default(),
            body_limit_mb: default_body_limit_mb(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl WebhookConfig {
    /// Whether the TLS listener is enabled
    pub fn tls_enabled(&self) -> bool {
        self.https_port != 0
    }

    /// Request body limit in bytes, clamped at `usize::MAX`
    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb.saturating_mul(1024 * 1024)
    }

    /// Shutdown grace period as Duration
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// TLS certificate and key files (PEM)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to the PEM certificate chain
    #[serde(default)]
    pub cert_file: PathBuf,

    /// Path to the PEM private key
    #[serde(default)]
    pub key_file: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human readable multi-line output
    Pretty,
}

// Default value functions
fn default_http_port() -> u16 {
    8080
}

fn default_body_limit_mb() -> usize {
    32
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Uses the file named by `AUDITLOG_PROXY_CONFIG` if set, otherwise the
    /// first existing file of the default search paths. The result is validated.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::find_config_paths().into_iter().find(|p| p.exists()),
        };

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if let Some(ref path) = path {
            tracing::info!("Loading configuration from: {}", path.display());
            figment = merge_file(figment, path)?;
        } else {
            tracing::debug!("No configuration file found, using defaults and environment");
        }

        let config: Config = figment
            .merge(Env::prefixed("AUDITLOG_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Environment variables still override file values.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        let config: Config = merge_file(figment, path.as_ref())?
            .merge(Env::prefixed("AUDITLOG_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Default search paths, highest priority first
    fn find_config_paths() -> Vec<PathBuf> {
        vec![
            PathBuf::from("config.yaml"),
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/auditlog-proxy/config.yaml"),
        ]
    }

    /// Reject configurations the proxy cannot serve with
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(Error::InvalidConfig("provider must be set".to_string()));
        }
        if self.webhook.body_limit_mb == 0 {
            return Err(Error::InvalidConfig(
                "webhook.body_limit_mb must be greater than zero".to_string(),
            ));
        }
        if self.webhook.tls_enabled() {
            if self.webhook.tls.cert_file.as_os_str().is_empty() {
                return Err(Error::InvalidConfig(
                    "webhook.tls.cert_file is required when https_port is set".to_string(),
                ));
            }
            if self.webhook.tls.key_file.as_os_str().is_empty() {
                return Err(Error::InvalidConfig(
                    "webhook.tls.key_file is required when https_port is set".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Provider configuration re-encoded as raw bytes for the provider to parse
    pub fn provider_config_bytes(&self) -> Result<Vec<u8>> {
        match &self.provider_config {
            Some(value) => serde_json::to_vec(value).map_err(|e| {
                Error::InvalidConfig(format!("provider_config cannot be encoded: {}", e))
            }),
            None => Ok(Vec::new()),
        }
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("toml") => Ok(figment.merge(Toml::file(path))),
        Some("yaml") | Some("yml") => Ok(figment.merge(Yaml::file(path))),
        Some("json") => Ok(figment.merge(Json::file(path))),
        _ => Err(Error::InvalidConfig(format!(
            "unsupported configuration file format: {}",
            path.display()
        ))),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: String::new(),
            provider_config: None,
            webhook: WebhookConfig::default(),
            log: LogConfig::default(),
        }
    }
}
