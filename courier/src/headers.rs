//! Reserved header names shared by the publish, consume and recovery paths.
//!
//! Names are case-sensitive and must match on the wire exactly.

pub const EVENT_ID: &str = "x-event-id";
pub const TRACE_ID: &str = "x-trace-id";
pub const RETRY_COUNT: &str = "x-retry-count";
pub const ORIGINAL_TOPIC: &str = "x-original-topic";
pub const ORIGINAL_PARTITION: &str = "x-original-partition";
pub const ORIGINAL_OFFSET: &str = "x-original-offset";
pub const FAILURE_CLASS: &str = "x-failure-class";
pub const FAILURE_MESSAGE: &str = "x-failure-message";

/// Last occurrence wins, matching Kafka's `lastHeader` semantics.
pub fn last_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .rev()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Replace every occurrence of `name` with a single entry.
pub fn replace_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    headers.retain(|(key, _)| key != name);
    headers.push((name.to_string(), value));
}

pub fn add_if_absent(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    if last_header(headers, name).is_none() {
        headers.push((name.to_string(), value));
    }
}
