//! Versioned decoding of audit event lists

use serde::Deserialize;

use super::event::EventList;
use crate::error::DecodeError;

/// API group of the Kubernetes audit schema
pub const AUDIT_GROUP: &str = "audit.k8s.io";

/// Kind of the webhook payload
pub const EVENT_LIST_KIND: &str = "EventList";

/// Decoder for `EventList` payloads of one API group
///
/// Built once at startup and handed to the sink; it never changes afterwards.
#[derive(Debug, Clone)]
pub struct AuditDecoder {
    group: String,
    versions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeMeta {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
}

impl AuditDecoder {
    /// Create a decoder accepting the given versions of `group`
    pub fn new<I, S>(group: impl Into<String>, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            group: group.into(),
            versions: versions.into_iter().map(Into::into).collect(),
        }
    }

    /// Decoder for the versions the API server webhook backend emits
    pub fn audit() -> Self {
        Self::new(AUDIT_GROUP, ["v1", "v1beta1"])
    }

    /// Whether `api_version` (`group/version`) is accepted
    pub fn accepts(&self, api_version: &str) -> bool {
        match api_version.split_once('/') {
            Some((group, version)) => {
                group == self.group && self.versions.iter().any(|v| v == version)
            }
            None => false,
        }
    }

    /// Decode a raw webhook body into an event list
    ///
    /// The payload must be tagged with an accepted `apiVersion` and kind
    /// `EventList`; events keep the order they were sent in.
    pub fn decode(&self, raw: &[u8]) -> Result<EventList, DecodeError> {
        let meta: TypeMeta = serde_json::from_slice(raw)?;
        if meta.api_version.is_empty() || meta.kind.is_empty() {
            return Err(DecodeError::MissingTypeMeta);
        }
        if !self.accepts(&meta.api_version) {
            return Err(DecodeError::UnsupportedVersion(meta.api_version));
        }
        if meta.kind != EVENT_LIST_KIND {
            return Err(DecodeError::UnexpectedKind(meta.kind));
        }

        Ok(serde_json::from_slice(raw)?)
    }
}

impl Default for AuditDecoder {
    fn default() -> Self {
        Self::audit()
    }
}
