//! Kubernetes audit event model and decoding

pub mod decoder;
pub mod event;

pub use decoder::{AuditDecoder, AUDIT_GROUP, EVENT_LIST_KIND};
pub use event::{Event, EventList, Level, ObjectReference, ResponseStatus, Stage, UserInfo};
