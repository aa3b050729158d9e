use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The uniform wrapper around every published payload.
///
/// `id` is assigned once at first publish and is never regenerated, including
/// across retry republishing; it is the idempotency key for the event's
/// entire retry lineage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub schema_version: String,
    pub payload: T,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// What handlers receive: one shape for enveloped and plain/legacy records.
///
/// Plain records carry no payload; only the raw headers and the transport
/// timestamp survive.
#[derive(Debug, Clone)]
pub struct UnifiedMessage<T> {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Option<T>,
    pub headers: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}
