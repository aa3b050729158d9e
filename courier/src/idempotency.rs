use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_redis::Client;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::warn;

use crate::config::MessagingConfig;
use crate::error::{ExecuteError, StoreError};

const PROCESSING: &str = "PROCESSING";
const DONE: &str = "DONE";

/// Status of a durable idempotency record.
///
/// `Failed` rows are kept forever: later redeliveries of the same event id
/// are permanent duplicates. The fast store forgives instead (the lock is
/// deleted on failure); the asymmetry between backends is intentional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Processing,
    Done,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Processing => "PROCESSING",
            RecordStatus::Done => "DONE",
            RecordStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseRecordStatusError(pub String);

impl FromStr for RecordStatus {
    type Err = ParseRecordStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(RecordStatus::Processing),
            "DONE" => Ok(RecordStatus::Done),
            "FAILED" => Ok(RecordStatus::Failed),
            invalid => Err(ParseRecordStatusError(invalid.to_owned())),
        }
    }
}

/// Storage contract for the durable idempotency backend.
///
/// `try_insert` must be atomic: exactly one caller per event id may see
/// `true`, enforced by a uniqueness constraint or equivalent.
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn try_insert(
        &self,
        event_id: &str,
        consumer_group: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<bool, StoreError>;

    async fn mark_done(&self, event_id: &str) -> Result<(), StoreError>;

    async fn mark_failed(&self, event_id: &str, error_message: &str) -> Result<(), StoreError>;
}

/// Durable repository on a PostgreSQL table with a unique `event_id`.
pub struct PgIdempotencyRepository {
    pool: PgPool,
    table: String,
}

impl PgIdempotencyRepository {
    pub fn new(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            table: table.to_owned(),
        }
    }

    pub async fn connect(url: &str, table: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().connect(url).await?;
        Ok(Self::new(pool, table))
    }
}

#[async_trait]
impl IdempotencyRepository for PgIdempotencyRepository {
    async fn try_insert(
        &self,
        event_id: &str,
        consumer_group: &str,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<bool, StoreError> {
        // TODO: escape the table name; sqlx can't bind identifiers.
        let base_query = format!(
            r#"
INSERT INTO "{}"
    (event_id, consumer_group, topic, partition_id, offset_id, status, created_at, updated_at)
VALUES
    ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            "#,
            &self.table
        );

        let result = sqlx::query(&base_query)
            .bind(event_id)
            .bind(consumer_group)
            .bind(topic)
            .bind(partition)
            .bind(offset)
            .bind(RecordStatus::Processing.as_str())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_error))
                if db_error.code().as_deref() == Some("23505") =>
            {
                // unique_violation: someone already claimed this event id
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn mark_done(&self, event_id: &str) -> Result<(), StoreError> {
        let base_query = format!(
            r#"UPDATE "{}" SET status = $1, updated_at = NOW() WHERE event_id = $2"#,
            &self.table
        );

        sqlx::query(&base_query)
            .bind(RecordStatus::Done.as_str())
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_failed(&self, event_id: &str, error_message: &str) -> Result<(), StoreError> {
        let base_query = format!(
            r#"UPDATE "{}" SET status = $1, error_msg = $2, updated_at = NOW() WHERE event_id = $3"#,
            &self.table
        );

        sqlx::query(&base_query)
            .bind(RecordStatus::Failed.as_str())
            .bind(error_message)
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Fast-store coordinator: a `SET NX EX` lock per event id.
///
/// On handler failure the lock is deleted, so a later redelivery may
/// reacquire and retry.
pub struct RedisIdempotentExecutor {
    client: Arc<dyn Client + Send + Sync>,
    key_prefix: String,
    processing_ttl: Duration,
    done_ttl: Duration,
}

impl RedisIdempotentExecutor {
    pub fn new(client: Arc<dyn Client + Send + Sync>, config: &MessagingConfig) -> Self {
        Self {
            client,
            key_prefix: config.idempotent_key_prefix.clone(),
            processing_ttl: config.processing_ttl(),
            done_ttl: config.done_ttl(),
        }
    }

    pub async fn execute<T, E, A, AF, D, DF>(
        &self,
        event_id: &str,
        action: A,
        on_duplicate: D,
    ) -> Result<T, ExecuteError<E>>
    where
        A: FnOnce() -> AF + Send,
        AF: Future<Output = Result<T, E>> + Send,
        D: FnOnce() -> DF + Send,
        DF: Future<Output = T> + Send,
        E: std::error::Error,
    {
        if event_id.trim().is_empty() {
            return action().await.map_err(ExecuteError::Handler);
        }

        let key = format!("{}{}", self.key_prefix, event_id);
        let acquired = self
            .client
            .set_nx_ex(
                key.clone(),
                PROCESSING.to_string(),
                self.processing_ttl.as_secs(),
            )
            .await
            .map_err(StoreError::from)?;
        if !acquired {
            return Ok(on_duplicate().await);
        }

        match action().await {
            Ok(result) => {
                self.client
                    .setex(key, DONE.to_string(), self.done_ttl.as_secs())
                    .await
                    .map_err(StoreError::from)?;
                Ok(result)
            }
            Err(handler_error) => {
                // Release the lock so a redelivery can retry; the handler
                // error always wins over a cleanup failure.
                if let Err(store_error) = self.client.del(key).await {
                    warn!(event_id, "failed to release idempotency lock: {}", store_error);
                }
                Err(ExecuteError::Handler(handler_error))
            }
        }
    }
}

/// Durable coordinator: an insert-if-absent row per event id.
pub struct DurableIdempotentExecutor {
    repository: Arc<dyn IdempotencyRepository>,
    consumer_group: String,
}

impl DurableIdempotentExecutor {
    pub fn new(repository: Arc<dyn IdempotencyRepository>, consumer_group: &str) -> Self {
        Self {
            repository,
            consumer_group: consumer_group.to_owned(),
        }
    }

    pub async fn execute<T, E, A, AF, D, DF>(
        &self,
        event_id: &str,
        action: A,
        on_duplicate: D,
    ) -> Result<T, ExecuteError<E>>
    where
        A: FnOnce() -> AF + Send,
        AF: Future<Output = Result<T, E>> + Send,
        D: FnOnce() -> DF + Send,
        DF: Future<Output = T> + Send,
        E: std::error::Error,
    {
        if event_id.trim().is_empty() {
            return action().await.map_err(ExecuteError::Handler);
        }

        // The execute interface carries no record coordinates, so the claim
        // row stamps placeholders for topic/partition/offset.
        let inserted = self
            .repository
            .try_insert(event_id, &self.consumer_group, "unknown", -1, -1)
            .await?;
        if !inserted {
            return Ok(on_duplicate().await);
        }

        match action().await {
            Ok(result) => {
                self.repository.mark_done(event_id).await?;
                Ok(result)
            }
            Err(handler_error) => {
                // The row stays FAILED forever; redeliveries of this event id
                // are permanent duplicates from here on.
                if let Err(store_error) = self
                    .repository
                    .mark_failed(event_id, &handler_error.to_string())
                    .await
                {
                    warn!(event_id, "failed to mark idempotency record: {}", store_error);
                }
                Err(ExecuteError::Handler(handler_error))
            }
        }
    }
}

/// The closed set of coordinator backends, selected by configuration.
pub enum IdempotentExecutor {
    Redis(RedisIdempotentExecutor),
    Durable(DurableIdempotentExecutor),
}

impl IdempotentExecutor {
    /// Guarantees at-most-one effective execution of `action` per event id.
    /// Losers of the acquisition race resolve through `on_duplicate`; a blank
    /// event id bypasses protection entirely.
    pub async fn execute<T, E, A, AF, D, DF>(
        &self,
        event_id: &str,
        action: A,
        on_duplicate: D,
    ) -> Result<T, ExecuteError<E>>
    where
        A: FnOnce() -> AF + Send,
        AF: Future<Output = Result<T, E>> + Send,
        D: FnOnce() -> DF + Send,
        DF: Future<Output = T> + Send,
        E: std::error::Error,
    {
        match self {
            IdempotentExecutor::Redis(executor) => {
                executor.execute(event_id, action, on_duplicate).await
            }
            IdempotentExecutor::Durable(executor) => {
                executor.execute(event_id, action, on_duplicate).await
            }
        }
    }
}
