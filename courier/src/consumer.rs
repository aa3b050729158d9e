use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use rdkafka::message::Headers;
use rdkafka::Message;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::envelope::{Envelope, UnifiedMessage};
use crate::headers;

/// Normalizes an inbound transport record into one shape for handlers.
///
/// Envelope-declared headers win on collision because they are merged after
/// the raw record headers. A record whose value is missing, or is not an
/// envelope, is passed through as a plain/legacy message with no payload.
pub fn adapt<T: DeserializeOwned, M: Message>(record: &M) -> UnifiedMessage<T> {
    let mut merged_headers = decode_headers(record);
    let record_key = record
        .key()
        .map(|key| String::from_utf8_lossy(key).into_owned());
    let record_timestamp = transport_timestamp(record);

    let envelope = record
        .payload()
        .and_then(|bytes| match serde_json::from_slice::<Envelope<T>>(bytes) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                debug!(topic = record.topic(), "record value is not an envelope: {}", e);
                None
            }
        });

    let Some(envelope) = envelope else {
        return UnifiedMessage {
            topic: record.topic().to_owned(),
            key: record_key,
            payload: None,
            headers: merged_headers,
            timestamp: record_timestamp,
        };
    };

    for (key, value) in &envelope.headers {
        merged_headers.insert(key.clone(), value.clone());
    }
    if !merged_headers.contains_key(headers::EVENT_ID) && !envelope.id.is_empty() {
        merged_headers.insert(headers::EVENT_ID.to_owned(), envelope.id.clone());
    }
    if !merged_headers.contains_key(headers::TRACE_ID) {
        if let Some(trace_id) = &envelope.trace_id {
            merged_headers.insert(headers::TRACE_ID.to_owned(), trace_id.clone());
        }
    }

    UnifiedMessage {
        topic: record.topic().to_owned(),
        key: record_key.or(Some(envelope.id)),
        payload: Some(envelope.payload),
        headers: merged_headers,
        timestamp: envelope.timestamp,
    }
}

fn decode_headers<M: Message>(record: &M) -> HashMap<String, String> {
    let mut decoded = HashMap::new();
    if let Some(raw_headers) = record.headers() {
        for header in raw_headers.iter() {
            if let Some(value) = header.value {
                decoded.insert(
                    header.key.to_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                );
            }
        }
    }
    decoded
}

fn transport_timestamp<M: Message>(record: &M) -> DateTime<Utc> {
    record
        .timestamp()
        .to_millis()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rdkafka::message::{Header, OwnedHeaders, OwnedMessage};
    use rdkafka::Timestamp;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct OrderPlaced {
        order_id: String,
    }

    fn envelope_bytes(
        id: &str,
        trace_id: Option<&str>,
        headers: HashMap<String, String>,
        timestamp: DateTime<Utc>,
    ) -> Vec<u8> {
        let envelope = Envelope {
            id: id.to_string(),
            event_type: "OrderPlaced".to_string(),
            trace_id: trace_id.map(str::to_owned),
            schema_version: "v1".to_string(),
            payload: OrderPlaced {
                order_id: "o-1".to_string(),
            },
            headers,
            timestamp,
        };
        serde_json::to_vec(&envelope).unwrap()
    }

    fn record(
        payload: Option<Vec<u8>>,
        key: Option<&str>,
        raw_headers: &[(&str, &str)],
        timestamp: Timestamp,
    ) -> OwnedMessage {
        let mut headers = OwnedHeaders::new_with_capacity(raw_headers.len());
        for (name, value) in raw_headers.iter().copied() {
            headers = headers.insert(Header {
                key: name,
                value: Some(value),
            });
        }

        OwnedMessage::new(
            payload,
            key.map(|k| k.as_bytes().to_vec()),
            "orders".to_string(),
            timestamp,
            0,
            42,
            Some(headers),
        )
    }

    #[test]
    fn test_envelope_headers_override_raw_headers() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let payload = envelope_bytes(
            "B",
            None,
            HashMap::from([("x-event-id".to_string(), "B".to_string())]),
            ts,
        );
        let record = record(
            Some(payload),
            Some("record-key"),
            &[("x-event-id", "A")],
            Timestamp::CreateTime(1_700_000_000_000),
        );

        let message: UnifiedMessage<OrderPlaced> = adapt(&record);

        assert_eq!(message.headers.get("x-event-id").map(String::as_str), Some("B"));
        // record key is non-null, so it wins over the envelope id
        assert_eq!(message.key.as_deref(), Some("record-key"));
    }

    #[test]
    fn test_keyless_record_falls_back_to_envelope_id() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let payload = envelope_bytes("evt-9", None, HashMap::new(), ts);
        let record = record(Some(payload), None, &[], Timestamp::CreateTime(0));

        let message: UnifiedMessage<OrderPlaced> = adapt(&record);

        assert_eq!(message.key.as_deref(), Some("evt-9"));
        assert_eq!(
            message.headers.get(headers::EVENT_ID).map(String::as_str),
            Some("evt-9")
        );
    }

    #[test]
    fn test_envelope_trace_id_fills_missing_header() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let payload = envelope_bytes("evt-1", Some("trace-5"), HashMap::new(), ts);
        let record = record(Some(payload), None, &[], Timestamp::CreateTime(0));

        let message: UnifiedMessage<OrderPlaced> = adapt(&record);

        assert_eq!(
            message.headers.get(headers::TRACE_ID).map(String::as_str),
            Some("trace-5")
        );
    }

    #[test]
    fn test_envelope_timestamp_wins_over_transport_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let payload = envelope_bytes("evt-2", None, HashMap::new(), ts);
        let record = record(
            Some(payload),
            None,
            &[],
            Timestamp::CreateTime(1_700_000_000_000),
        );

        let message: UnifiedMessage<OrderPlaced> = adapt(&record);

        assert_eq!(message.timestamp, ts);
        assert_eq!(message.payload.unwrap().order_id, "o-1");
    }

    #[test]
    fn test_plain_record_has_no_payload() {
        let record = record(
            None,
            Some("legacy-key"),
            &[("x-event-id", "raw-id")],
            Timestamp::CreateTime(1_700_000_000_000),
        );

        let message: UnifiedMessage<OrderPlaced> = adapt(&record);

        assert!(message.payload.is_none());
        assert_eq!(message.key.as_deref(), Some("legacy-key"));
        assert_eq!(
            message.headers.get(headers::EVENT_ID).map(String::as_str),
            Some("raw-id")
        );
        assert_eq!(
            message.timestamp,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
        );
    }

    #[test]
    fn test_non_envelope_value_is_treated_as_plain() {
        let record = record(
            Some(b"not json at all".to_vec()),
            None,
            &[],
            Timestamp::CreateTime(1_700_000_000_000),
        );

        let message: UnifiedMessage<OrderPlaced> = adapt(&record);

        assert!(message.payload.is_none());
        assert!(message.key.is_none());
    }
}
