use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct MessagingConfig {
    pub default_topic: Option<String>,

    #[envconfig(default = "v1")]
    pub schema_version: String,

    /// Topics whose relative per-key order must be preserved. Publishing to
    /// one of these without a resolvable key fails.
    #[envconfig(default = "")]
    pub ordered_topics: CommaSeparated,

    #[envconfig(default = "none")]
    pub unordered_key_strategy: UnorderedKeyStrategy,

    #[envconfig(default = "true")]
    pub retry_enabled: bool,

    /// Delay labels name the retry tiers; timing is the responsibility of
    /// whatever consumes the tier topics.
    #[envconfig(default = "1m,10m,1h")]
    pub retry_topic_delays: CommaSeparated,

    #[envconfig(default = "dlq")]
    pub dlq_suffix: String,

    #[envconfig(default = "none")]
    pub idempotent_store: IdempotentStore,

    #[envconfig(default = "kafka:idem:")]
    pub idempotent_key_prefix: String,

    #[envconfig(default = "600")]
    pub idempotent_processing_ttl_secs: u64,

    #[envconfig(default = "604800")]
    pub idempotent_done_ttl_secs: u64, // 7 days

    #[envconfig(default = "kafka_idempotent_record")]
    pub idempotent_table_name: String,
}

impl MessagingConfig {
    pub fn processing_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotent_processing_ttl_secs)
    }

    pub fn done_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotent_done_ttl_secs)
    }
}

/// Comma-separated list env values, blanks dropped.
#[derive(Debug, Clone, Default)]
pub struct CommaSeparated(pub Vec<String>);

impl CommaSeparated {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseListError;

impl FromStr for CommaSeparated {
    type Err = ParseListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let items = s
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(CommaSeparated(items))
    }
}

/// Key strategy for topics without ordering requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnorderedKeyStrategy {
    /// No key; the transport load-balances across partitions.
    #[default]
    None,
    /// A generated key gives each message a stable partition for its own
    /// lifetime while still spreading load.
    Random,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseStrategyError(pub String);

impl FromStr for UnorderedKeyStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "none" => Ok(UnorderedKeyStrategy::None),
            "random" => Ok(UnorderedKeyStrategy::Random),
            invalid => Err(ParseStrategyError(invalid.to_owned())),
        }
    }
}

/// Which backend guards handler execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdempotentStore {
    #[default]
    None,
    Redis,
    Db,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseStoreError(pub String);

impl FromStr for IdempotentStore {
    type Err = ParseStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "none" => Ok(IdempotentStore::None),
            "redis" => Ok(IdempotentStore::Redis),
            "db" => Ok(IdempotentStore::Db),
            invalid => Err(ParseStoreError(invalid.to_owned())),
        }
    }
}
