use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::ClientConfig;

use crate::config::{ConsumerConfig, KafkaConfig};

pub fn create_kafka_consumer(
    common_config: &KafkaConfig,
    consumer_config: &ConsumerConfig,
) -> Result<StreamConsumer, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &common_config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("group.id", &consumer_config.kafka_consumer_group)
        .set(
            "enable.auto.commit",
            consumer_config.kafka_consumer_auto_commit.to_string(),
        )
        .set(
            "auto.offset.reset",
            &consumer_config.kafka_consumer_offset_reset,
        )
        .set(
            "isolation.level",
            &consumer_config.kafka_consumer_isolation_level,
        );

    // Offsets are stored explicitly once a message has been handled.
    client_config.set("enable.auto.offset.store", "false");

    if common_config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    let consumer: StreamConsumer = client_config.create()?;
    consumer.subscribe(&[consumer_config.kafka_consumer_topic.as_str()])?;

    Ok(consumer)
}
