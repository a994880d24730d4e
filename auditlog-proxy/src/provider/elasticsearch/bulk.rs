//! Bulk API encoding and response handling

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::audit::EventList;
use crate::error::{BulkFailures, BulkItemFailure, ProviderError};

/// Document type written in every action descriptor
pub const DOCUMENT_TYPE: &str = "_doc";

/// Content type expected by the bulk endpoint
pub const CONTENT_TYPE: &str = "application/x-ndjson";

/// Build one newline-delimited bulk payload from a request's events
///
/// Every event becomes an `index` action line followed by the document line.
/// Request and response bodies are always dropped: their arbitrary shapes
/// break the backend's dynamic mapping.
pub fn encode(index: &str, events: EventList) -> Result<Vec<u8>, ProviderError> {
    let action = serde_json::to_vec(&serde_json::json!({
        "index": { "_index": index, "_type": DOCUMENT_TYPE }
    }))?;

    let mut payload = Vec::new();
    for mut event in events.items {
        event.redact_payloads();

        payload.extend_from_slice(&action);
        payload.push(b'\n');
        serde_json::to_writer(&mut payload, &event)?;
        payload.push(b'\n');
    }
    Ok(payload)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BTreeMap<String, BulkResponseItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    #[serde(default, rename = "_index")]
    index: String,
    #[serde(default, rename = "_id")]
    id: String,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Whether a status lies in the accepted 200..=299 range
pub fn is_success(status: u16) -> bool {
    (200..=299).contains(&status)
}

/// Interpret a 2xx bulk response body
///
/// Succeeds when the envelope reports no errors, or when every item
/// succeeded. Otherwise every failing item is collected into one
/// [`BulkFailures`]. An envelope that flags errors without listing any items
/// is treated as a backend failure.
pub fn check_response(body: &[u8]) -> Result<(), ProviderError> {
    let response: BulkResponse = serde_json::from_slice(body).map_err(|e| {
        ProviderError::InvalidResponse(format!("unable to unmarshal bulk response: {}", e))
    })?;

    if !response.errors {
        return Ok(());
    }
    if response.items.is_empty() {
        return Err(ProviderError::BackendRejected);
    }

    let mut total = 0;
    let mut failures = Vec::new();
    for action in response.items {
        for (name, item) in action {
            total += 1;
            if !is_success(item.status) {
                failures.push(BulkItemFailure {
                    action: name,
                    index: item.index,
                    id: item.id,
                    status: item.status,
                    error: item.error,
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(BulkFailures { failures, total }.into())
    }
}
