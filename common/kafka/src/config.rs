use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "10")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "10000000")]
    pub kafka_producer_queue_messages: u32, // Maximum number of messages in the in-memory producer queue

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "lz4")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "all")]
    pub kafka_producer_acks: String,

    // The idempotent producer gives us broker-side dedup of producer retries,
    // at the cost of capping in-flight requests per connection.
    #[envconfig(default = "true")]
    pub kafka_producer_idempotence: bool,
}

#[derive(Envconfig, Clone)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,

    #[envconfig(default = "latest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    // Consumers in this layer commit offsets through the dispatcher, so both
    // auto commit and auto offset store default to off.
    #[envconfig(default = "false")]
    pub kafka_consumer_auto_commit: bool,

    #[envconfig(default = "read_committed")]
    pub kafka_consumer_isolation_level: String, // read_uncommitted, read_committed
}

impl ConsumerConfig {
    /// Because the consumer config is so application specific, we
    /// can't set good defaults in the derive macro, so we expose a way
    /// for users to set them here before init'ing their main config struct
    pub fn set_defaults(consumer_group: &str, consumer_topic: &str) {
        if std::env::var("KAFKA_CONSUMER_GROUP").is_err() {
            std::env::set_var("KAFKA_CONSUMER_GROUP", consumer_group);
        };
        if std::env::var("KAFKA_CONSUMER_TOPIC").is_err() {
            std::env::set_var("KAFKA_CONSUMER_TOPIC", consumer_topic);
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_kafka_config_defaults() {
        let config = KafkaConfig::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.kafka_hosts, "localhost:9092");
        assert_eq!(config.kafka_compression_codec, "lz4");
        assert_eq!(config.kafka_producer_acks, "all");
        assert!(config.kafka_producer_idempotence);
        assert!(!config.kafka_tls);
    }

    #[test]
    fn test_consumer_config_requires_group_and_topic() {
        let result = ConsumerConfig::init_from_hashmap(&HashMap::new());
        assert!(result.is_err());

        let mut env = HashMap::new();
        env.insert("KAFKA_CONSUMER_GROUP".to_string(), "orders".to_string());
        env.insert("KAFKA_CONSUMER_TOPIC".to_string(), "order.events".to_string());
        let config = ConsumerConfig::init_from_hashmap(&env).unwrap();

        assert_eq!(config.kafka_consumer_offset_reset, "latest");
        assert_eq!(config.kafka_consumer_isolation_level, "read_committed");
        assert!(!config.kafka_consumer_auto_commit);
    }
}
