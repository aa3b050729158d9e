use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::config::MessagingConfig;
use crate::envelope::Envelope;
use crate::error::PublishError;
use crate::headers;
use crate::keys::{EventPayload, KeyResolver};
use crate::sink::{MessageSink, OutboundRecord};

/// Per-call publish extras. Caller-supplied headers are never overwritten,
/// and the trace id is threaded in explicitly from the caller's context.
#[derive(Default)]
pub struct PublishOpts {
    pub key: Option<String>,
    pub headers: HashMap<String, String>,
    pub trace_id: Option<String>,
}

/// The publish path: key resolution, header merge, envelope construction,
/// and the handoff to the transport. No local buffering, no retry.
pub struct EventPublisher<S: MessageSink> {
    sink: S,
    resolver: KeyResolver,
    default_topic: Option<String>,
    schema_version: String,
}

impl<S: MessageSink> EventPublisher<S> {
    pub fn new(sink: S, config: &MessagingConfig) -> Self {
        Self {
            sink,
            resolver: KeyResolver::new(config),
            default_topic: config.default_topic.clone(),
            schema_version: config.schema_version.clone(),
        }
    }

    pub async fn publish<T: EventPayload>(
        &self,
        topic: &str,
        payload: &T,
    ) -> Result<(), PublishError> {
        self.publish_opts(topic, payload, PublishOpts::default())
            .await
    }

    pub async fn publish_keyed<T: EventPayload>(
        &self,
        topic: &str,
        key: &str,
        payload: &T,
    ) -> Result<(), PublishError> {
        self.publish_opts(
            topic,
            payload,
            PublishOpts {
                key: Some(key.to_owned()),
                ..PublishOpts::default()
            },
        )
        .await
    }

    pub async fn publish_default<T: EventPayload>(&self, payload: &T) -> Result<(), PublishError> {
        let topic = self
            .default_topic
            .as_deref()
            .filter(|topic| !topic.trim().is_empty())
            .ok_or(PublishError::MissingDefaultTopic)?
            .to_owned();

        self.publish_opts(&topic, payload, PublishOpts::default())
            .await
    }

    pub async fn publish_opts<T: EventPayload>(
        &self,
        topic: &str,
        payload: &T,
        opts: PublishOpts,
    ) -> Result<(), PublishError> {
        let key = self.resolver.resolve(topic, opts.key.as_deref(), payload)?;

        let mut merged_headers = opts.headers;
        let event_id = ensure_header(&mut merged_headers, headers::EVENT_ID, || {
            Some(Uuid::now_v7().to_string())
        })
        .unwrap_or_default();
        let trace_id = ensure_header(&mut merged_headers, headers::TRACE_ID, || {
            opts.trace_id.clone()
        });

        let envelope = Envelope {
            id: event_id.clone(),
            event_type: payload.event_type().to_owned(),
            trace_id,
            schema_version: self.schema_version.clone(),
            payload,
            headers: merged_headers.clone(),
            timestamp: Utc::now(),
        };
        let value = serde_json::to_vec(&envelope)?;

        let record = OutboundRecord {
            topic: topic.to_owned(),
            partition: None,
            key,
            payload: Some(value),
            headers: merged_headers.into_iter().collect(),
        };

        debug!(topic, event_id = %event_id, "publishing event");
        self.sink.send(record).await?;
        metrics::counter!("courier_events_published_total", "topic" => topic.to_owned())
            .increment(1);

        Ok(())
    }
}

/// Returns the existing value if the header is present; otherwise fills it
/// from `candidate` when one is available. Blank candidates leave the header
/// unset.
fn ensure_header(
    headers: &mut HashMap<String, String>,
    name: &str,
    candidate: impl FnOnce() -> Option<String>,
) -> Option<String> {
    if let Some(existing) = headers.get(name) {
        return Some(existing.clone());
    }
    match candidate().filter(|value| !value.trim().is_empty()) {
        Some(value) => {
            headers.insert(name.to_owned(), value.clone());
            Some(value)
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::sink::MemorySink;
    use envconfig::Envconfig;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize)]
    struct OrderPlaced {
        order_id: String,
    }

    impl EventPayload for OrderPlaced {
        fn ordering_key(&self) -> Option<String> {
            Some(self.order_id.clone())
        }

        fn event_type(&self) -> &'static str {
            "OrderPlaced"
        }
    }

    fn publisher(env: &[(&str, &str)]) -> (EventPublisher<MemorySink>, MemorySink) {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = MessagingConfig::init_from_hashmap(&env).unwrap();
        let sink = MemorySink::new();
        (EventPublisher::new(sink.clone(), &config), sink)
    }

    fn sent_envelope(record: &crate::sink::OutboundRecord) -> Envelope<OrderPlaced> {
        serde_json::from_slice(record.payload.as_deref().unwrap()).unwrap()
    }

    fn header_value<'a>(record: &'a crate::sink::OutboundRecord, name: &str) -> Option<&'a str> {
        crate::headers::last_header(&record.headers, name)
    }

    #[tokio::test]
    async fn test_publish_generates_event_id_and_envelope() {
        let (publisher, sink) = publisher(&[]);
        let payload = OrderPlaced {
            order_id: "o-1".to_string(),
        };

        publisher.publish("orders", &payload).await.unwrap();

        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        let envelope = sent_envelope(&sent[0]);

        assert_eq!(envelope.event_type, "OrderPlaced");
        assert_eq!(envelope.schema_version, "v1");
        assert_eq!(envelope.payload.order_id, "o-1");
        assert!(!envelope.id.is_empty());
        assert_eq!(header_value(&sent[0], headers::EVENT_ID), Some(envelope.id.as_str()));
        // unordered topic, default strategy: keyless
        assert_eq!(sent[0].key, None);
    }

    #[tokio::test]
    async fn test_caller_supplied_event_id_is_preserved() {
        let (publisher, sink) = publisher(&[]);
        let payload = OrderPlaced {
            order_id: "o-2".to_string(),
        };

        publisher
            .publish_opts(
                "orders",
                &payload,
                PublishOpts {
                    headers: HashMap::from([(
                        headers::EVENT_ID.to_string(),
                        "caller-id".to_string(),
                    )]),
                    ..PublishOpts::default()
                },
            )
            .await
            .unwrap();

        let sent = sink.sent();
        let envelope = sent_envelope(&sent[0]);
        assert_eq!(envelope.id, "caller-id");
        assert_eq!(header_value(&sent[0], headers::EVENT_ID), Some("caller-id"));
    }

    #[tokio::test]
    async fn test_trace_id_filled_only_if_absent() {
        let (publisher, sink) = publisher(&[]);
        let payload = OrderPlaced {
            order_id: "o-3".to_string(),
        };

        publisher
            .publish_opts(
                "orders",
                &payload,
                PublishOpts {
                    trace_id: Some("trace-from-context".to_string()),
                    ..PublishOpts::default()
                },
            )
            .await
            .unwrap();
        publisher
            .publish_opts(
                "orders",
                &payload,
                PublishOpts {
                    headers: HashMap::from([(
                        headers::TRACE_ID.to_string(),
                        "caller-trace".to_string(),
                    )]),
                    trace_id: Some("trace-from-context".to_string()),
                    ..PublishOpts::default()
                },
            )
            .await
            .unwrap();
        publisher.publish("orders", &payload).await.unwrap();

        let sent = sink.sent();
        assert_eq!(sent_envelope(&sent[0]).trace_id.as_deref(), Some("trace-from-context"));
        assert_eq!(sent_envelope(&sent[1]).trace_id.as_deref(), Some("caller-trace"));
        // no ambient context, no header: simply omitted
        assert_eq!(sent_envelope(&sent[2]).trace_id, None);
        assert_eq!(header_value(&sent[2], headers::TRACE_ID), None);
    }

    #[tokio::test]
    async fn test_ordered_topic_without_key_never_sends() {
        #[derive(Serialize)]
        struct Keyless;
        impl EventPayload for Keyless {}

        let (publisher, sink) = publisher(&[("ORDERED_TOPICS", "orders")]);

        let err = publisher.publish("orders", &Keyless).await.unwrap_err();

        assert!(matches!(err, PublishError::MissingOrderingKey { .. }));
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ordered_topic_uses_payload_key() {
        let (publisher, sink) = publisher(&[("ORDERED_TOPICS", "orders")]);
        let payload = OrderPlaced {
            order_id: "o-4".to_string(),
        };

        publisher.publish("orders", &payload).await.unwrap();

        assert_eq!(sink.sent()[0].key.as_deref(), Some("o-4"));
    }

    #[tokio::test]
    async fn test_publish_default_requires_configured_topic() {
        let (unconfigured, _) = publisher(&[]);
        let payload = OrderPlaced {
            order_id: "o-5".to_string(),
        };

        let err = unconfigured.publish_default(&payload).await.unwrap_err();
        assert!(matches!(err, PublishError::MissingDefaultTopic));

        let (publisher, sink) = publisher(&[("DEFAULT_TOPIC", "orders")]);
        publisher.publish_default(&payload).await.unwrap();
        assert_eq!(sink.sent()[0].topic, "orders");
    }

    #[tokio::test]
    async fn test_extra_headers_are_emitted_on_record() {
        let (publisher, sink) = publisher(&[]);
        let payload = OrderPlaced {
            order_id: "o-6".to_string(),
        };

        publisher
            .publish_opts(
                "orders",
                &payload,
                PublishOpts {
                    headers: HashMap::from([("tenant".to_string(), "acme".to_string())]),
                    ..PublishOpts::default()
                },
            )
            .await
            .unwrap();

        let sent = sink.sent();
        assert_eq!(header_value(&sent[0], "tenant"), Some("acme"));
        let envelope = sent_envelope(&sent[0]);
        assert_eq!(envelope.headers.get("tenant").map(String::as_str), Some("acme"));
    }
}
