//! Error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using the startup error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring and starting the proxy
///
/// All of these are fatal: the process refuses to serve rather than run
/// half-configured.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration loaded but failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No provider registered under the configured name
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Two providers were registered under the same name
    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),

    /// A provider could not be constructed or injected
    #[error("Provider {provider} could not be initialized: {source}")]
    Provider {
        /// Name of the provider
        provider: String,
        /// Underlying provider error
        #[source]
        source: ProviderError,
    },

    /// TLS material could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// Certificate generation failed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

/// Errors returned by a provider while forwarding events
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider was used before its backend configuration was set
    #[error("configuration is not defined")]
    NotConfigured,

    /// Backend configuration blob could not be parsed
    #[error("invalid backend configuration: {0}")]
    InvalidConfig(String),

    /// The backend endpoint could not be resolved
    #[error("backend discovery failed: {0}")]
    Discovery(String),

    /// The HTTP client could not be built
    #[error("unable to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// An event could not be serialized into a document
    #[error("unable to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The backend could not be reached
    #[error("unable to do request to {url}: {source}")]
    Transport {
        /// Request URL
        url: String,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a status outside 200..=299
    #[error("request {url} returned status code {status}")]
    Status {
        /// Request URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The backend response body could not be interpreted
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// The bulk envelope flagged errors but listed no items
    #[error("elasticsearch returned an error")]
    BackendRejected,

    /// One or more bulk items failed
    #[error(transparent)]
    Bulk(#[from] BulkFailures),
}

/// A single document rejected by a bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemFailure {
    /// Bulk action name (`index`, `create`, ...)
    pub action: String,
    /// Target index reported by the backend
    pub index: String,
    /// Document id reported by the backend
    pub id: String,
    /// Per-item HTTP status
    pub status: u16,
    /// Raw backend error, if any
    pub error: Option<serde_json::Value>,
}

impl fmt::Display for BulkItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.action)?;
        if !self.index.is_empty() || !self.id.is_empty() {
            write!(f, "{}/{} ", self.index, self.id)?;
        }
        write!(f, "failed with status {}", self.status)?;
        match &self.error {
            Some(serde_json::Value::String(reason)) => write!(f, ": {}", reason),
            Some(other) => write!(f, ": {}", other),
            None => Ok(()),
        }
    }
}

/// Every failed item of one bulk request, collected into a single error
#[derive(Debug, Clone, PartialEq, Error)]
pub struct BulkFailures {
    /// Items whose status was outside 200..=299
    pub failures: Vec<BulkItemFailure>,
    /// Number of items in the bulk response
    pub total: usize,
}

impl fmt::Display for BulkFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} bulk items failed: ",
            self.failures.len(),
            self.total
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

/// Errors raised while decoding an inbound event list
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body is not valid JSON for the expected shape
    #[error("malformed event list: {0}")]
    Json(#[from] serde_json::Error),

    /// `apiVersion` or `kind` is missing
    #[error("object 'Kind' or 'apiVersion' is missing")]
    MissingTypeMeta,

    /// Group or version not accepted by this decoder
    #[error("unsupported apiVersion {0}")]
    UnsupportedVersion(String),

    /// Kind other than the expected list kind
    #[error("unexpected kind {0}, expected EventList")]
    UnexpectedKind(String),
}

/// Per-request failures of the audit sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// Request body could not be read
    #[error("unable to read body of request: {0}")]
    Read(String),

    /// Request body is not a valid event list
    #[error("unable to decode event list: {0}")]
    Decode(#[from] DecodeError),

    /// The provider failed to forward the events
    #[error("unable to log event list: {0}")]
    Forward(#[from] ProviderError),
}

/// Error response body
///
/// The caller is the API server, so the body never carries backend detail.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,

    /// Optional error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            status: status.as_u16(),
        }
    }

    /// Create error response with a code
    pub fn with_code(
        status: StatusCode,
        code: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl SinkError {
    /// HTTP status reported to the caller
    pub fn status(&self) -> StatusCode {
        match self {
            SinkError::Read(_) | SinkError::Decode(_) => StatusCode::BAD_REQUEST,
            SinkError::Forward(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SinkError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_response = match &self {
            SinkError::Read(_) => {
                ErrorResponse::with_code(status, "READ_ERROR", "unable to read content")
            }
            SinkError::Decode(_) => {
                ErrorResponse::with_code(status, "DECODE_ERROR", "unable to decode event list")
            }
            SinkError::Forward(_) => {
                ErrorResponse::with_code(status, "FORWARD_ERROR", "unable to log event list")
            }
        };

        (status, Json(error_response)).into_response()
    }
}
