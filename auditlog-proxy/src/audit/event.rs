//! Audit event types
//!
//! Wire model of the Kubernetes audit API (`audit.k8s.io`). Field names follow
//! the versioned JSON encoding sent by the API server's webhook backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An ordered batch of audit events, one per webhook request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventList {
    /// Group/version of the payload, e.g. `audit.k8s.io/v1`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    /// Always `EventList`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    /// List metadata
    #[serde(default)]
    pub metadata: ListMeta,
    /// Events in the order the API server emitted them
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<Event>,
}

impl EventList {
    /// Number of events in the list
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list carries no events
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Treat an explicit JSON `null` like an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// List metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    /// Resource version of the list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

/// One audited API interaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Audit level the event was generated at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    /// Unique audit id, shared by all stages of one request
    #[serde(default, rename = "auditID")]
    pub audit_id: String,
    /// Request handling stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    /// Request URI as sent by the client
    #[serde(default, rename = "requestURI")]
    pub request_uri: String,
    /// Kubernetes verb (get, list, create, ...)
    #[serde(default)]
    pub verb: String,
    /// Authenticated user
    #[serde(default)]
    pub user: UserInfo,
    /// Impersonated user, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonated_user: Option<UserInfo>,
    /// Source addresses of the request
    #[serde(
        default,
        rename = "sourceIPs",
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub source_ips: Vec<String>,
    /// Client user agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Object the request targeted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_ref: Option<ObjectReference>,
    /// Response status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<ResponseStatus>,
    /// Request body, present at level Request and above
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_object: Option<serde_json::Value>,
    /// Response body, present at level RequestResponse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_object: Option<serde_json::Value>,
    /// When the API server received the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_received_timestamp: Option<DateTime<Utc>>,
    /// When the request reached the current stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timestamp: Option<DateTime<Utc>>,
    /// Free-form annotations set by admission and authorization
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,
}

impl Event {
    /// Drop the request and response bodies
    pub fn redact_payloads(&mut self) {
        self.request_object = None;
        self.response_object = None;
    }

    /// Short rendering of the targeted object
    ///
    /// Format: `{apiGroup}/{apiVersion} - {name}/{namespace}`. Events without
    /// an object reference (non-resource URLs) render with empty parts.
    pub fn object_summary(&self) -> String {
        let empty = ObjectReference::default();
        let obj = self.object_ref.as_ref().unwrap_or(&empty);
        format!(
            "{}/{} - {}/{}",
            obj.api_group, obj.api_version, obj.name, obj.namespace
        )
    }
}

/// Audit policy level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    /// Event is not logged
    None,
    /// Request metadata only
    Metadata,
    /// Metadata and request body
    Request,
    /// Metadata, request and response bodies
    RequestResponse,
}

impl Level {
    /// Wire name of the level
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Metadata => "Metadata",
            Self::Request => "Request",
            Self::RequestResponse => "RequestResponse",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request handling stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Generated as soon as the request is received
    RequestReceived,
    /// Response headers sent, body not yet complete (long running requests)
    ResponseStarted,
    /// Response complete
    ResponseComplete,
    /// Request handling panicked
    Panic,
}

/// Authenticated user information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// User name
    #[serde(default)]
    pub username: String,
    /// Stable user identifier
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Groups the user belongs to
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub groups: Vec<String>,
    /// Extra attributes provided by the authenticator
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub extra: BTreeMap<String, Vec<String>>,
}

/// Reference to the object a request targeted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// Resource type (pods, secrets, ...)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    /// Namespace of the object
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Name of the object
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// UID of the object
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// API group, empty for the core group
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,
    /// API version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    /// Resource version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    /// Subresource (status, log, exec, ...)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subresource: String,
}

/// Response status as returned to the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStatus {
    /// HTTP status code
    #[serde(default)]
    pub code: i32,
    /// `Success` or `Failure`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// Human readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Machine readable reason
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "level": "RequestResponse",
            "auditID": "8c0d2a4e-5c61-4c3d-9d0b-0b5e2a4d2f11",
            "stage": "ResponseComplete",
            "requestURI": "/api/v1/namespaces/default/pods/web-0",
            "verb": "get",
            "user": {"username": "system:admin", "groups": ["system:masters"]},
            "sourceIPs": ["10.0.0.1"],
            "objectRef": {
                "resource": "pods",
                "namespace": "default",
                "name": "web-0",
                "apiVersion": "v1"
            },
            "responseStatus": {"metadata": {}, "code": 200},
            "requestObject": {"kind": "Pod"},
            "responseObject": {"kind": "Pod", "metadata": {"labels": {"app": "web"}}},
            "requestReceivedTimestamp": "2020-03-01T10:00:00.123456Z",
            "stageTimestamp": "2020-03-01T10:00:00.223456Z"
        })
    }

    #[test]
    fn test_event_deserializes_wire_names() {
        let event: Event = serde_json::from_value(sample()).expect("event");
        assert_eq!(event.level, Some(Level::RequestResponse));
        assert_eq!(event.stage, Some(Stage::ResponseComplete));
        assert_eq!(event.user.username, "system:admin");
        assert_eq!(event.source_ips, vec!["10.0.0.1".to_string()]);
        assert_eq!(event.response_status.as_ref().map(|s| s.code), Some(200));
        assert!(event.request_received_timestamp.is_some());
    }

    #[test]
    fn test_redact_payloads() {
        let mut event: Event = serde_json::from_value(sample()).expect("event");
        event.redact_payloads();

        let value = serde_json::to_value(&event).expect("serialize");
        assert!(value.get("requestObject").is_none());
        assert!(value.get("responseObject").is_none());
        assert_eq!(value["objectRef"]["name"], "web-0");
        assert_eq!(value["auditID"], "8c0d2a4e-5c61-4c3d-9d0b-0b5e2a4d2f11");
    }

    #[test]
    fn test_object_summary() {
        let event: Event = serde_json::from_value(sample()).expect("event");
        assert_eq!(event.object_summary(), "/v1 - web-0/default");

        let bare = Event::default();
        assert_eq!(bare.object_summary(), "/ - /");
    }

    #[test]
    fn test_missing_level_and_stage_stay_absent() {
        let event: Event = serde_json::from_value(json!({"auditID": "a1"})).expect("event");
        assert_eq!(event.level, None);
        assert_eq!(event.stage, None);

        let value = serde_json::to_value(&event).expect("serialize");
        assert!(value.get("level").is_none());
        assert!(value.get("stage").is_none());
    }

    #[test]
    fn test_null_collections_decode_as_empty() {
        let event: Event = serde_json::from_value(json!({
            "auditID": "a1",
            "user": {"username": "kubelet", "groups": null, "extra": null},
            "sourceIPs": null,
            "annotations": null
        }))
        .expect("event");
        assert!(event.user.groups.is_empty());
        assert!(event.user.extra.is_empty());
        assert!(event.source_ips.is_empty());
        assert!(event.annotations.is_empty());
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::Metadata.to_string(), "Metadata");
        assert_eq!(Level::RequestResponse.to_string(), "RequestResponse");
    }
}
