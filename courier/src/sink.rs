use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use common_kafka::config::KafkaConfig;
use common_kafka::kafka_producer::{create_kafka_producer, KafkaContext};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientContext;
use tracing::error;

use crate::error::SinkError;

/// A fully assembled record ready for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRecord {
    pub topic: String,
    pub partition: Option<i32>,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
}

/// The transport boundary: `send(topic, key, value, headers)`.
///
/// Implementations enqueue and return; delivery guarantees belong to the
/// transport, not to this layer.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, record: OutboundRecord) -> Result<(), SinkError>;
}

pub struct KafkaSink<C: ClientContext + 'static> {
    producer: FutureProducer<C>,
}

impl<C: ClientContext + 'static> KafkaSink<C> {
    pub fn new(producer: FutureProducer<C>) -> Self {
        KafkaSink { producer }
    }
}

impl KafkaSink<KafkaContext> {
    /// Builds the sink on a fully configured producer, including the
    /// metadata ping that fails fast when the brokers are unreachable.
    pub async fn from_config(config: &KafkaConfig) -> Result<Self, KafkaError> {
        let producer = create_kafka_producer(config).await?;
        Ok(KafkaSink::new(producer))
    }
}

#[async_trait]
impl<C: ClientContext + 'static> MessageSink for KafkaSink<C> {
    async fn send(&self, record: OutboundRecord) -> Result<(), SinkError> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value),
            });
        }

        let future_record = FutureRecord {
            topic: record.topic.as_str(),
            partition: record.partition,
            payload: record.payload.as_deref(),
            key: record.key.as_deref(),
            timestamp: None,
            headers: Some(headers),
        };

        // Fire-and-forget: the delivery future is dropped once the record is
        // on the producer queue. Queue-full and similar enqueue failures are
        // the only errors surfaced here.
        match self.producer.send_result(future_record) {
            Ok(_) => {
                metrics::counter!("courier_records_enqueued_total").increment(1);
                Ok(())
            }
            Err((e, _)) => {
                error!("failed to enqueue record to {}: {}", record.topic, e);
                metrics::counter!("courier_records_enqueue_failures_total").increment(1);
                Err(SinkError::Kafka(e))
            }
        }
    }
}

/// Records every send for assertions; the tests' stand-in transport.
#[derive(Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<OutboundRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundRecord> {
        match self.sent.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, record: OutboundRecord) -> Result<(), SinkError> {
        match self.sent.lock() {
            Ok(mut guard) => guard.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
        Ok(())
    }
}
