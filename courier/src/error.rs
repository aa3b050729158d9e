use thiserror::Error;

/// Fatal failures of a publish attempt. The caller must not send.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("ordered topic {topic} requires a message key")]
    MissingOrderingKey { topic: String },
    #[error("default topic is not configured")]
    MissingDefaultTopic,
    #[error("failed to serialize event envelope: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Failure to hand a record to the transport.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to enqueue record to kafka: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// An idempotency backend call failed. Propagated unmodified; retrying is a
/// dispatch-level policy, not ours.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Redis(#[from] common_redis::CustomRedisError),
    #[error("idempotency store query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a guarded execution that did not produce a value.
///
/// A duplicate is not an error; it resolves through `on_duplicate`.
#[derive(Error, Debug)]
pub enum ExecuteError<E: std::error::Error> {
    #[error("handler failed: {0}")]
    Handler(E),
    #[error(transparent)]
    Store(#[from] StoreError),
}
