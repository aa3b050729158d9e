use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

pub struct KafkaContext;

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        metrics::gauge!("kafka_callback_queue_depth").set(stats.replyq as f64);
        metrics::gauge!("kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        metrics::gauge!("kafka_producer_queue_depth_limit").set(stats.msg_max as f64);
        metrics::gauge!("kafka_producer_queue_bytes").set(stats.msg_size as f64);
        metrics::gauge!("kafka_producer_queue_bytes_limit").set(stats.msg_size_max as f64);

        for (topic, stats) in stats.topics {
            metrics::gauge!("kafka_produce_avg_batch_size_bytes", "topic" => topic.clone())
                .set(stats.batchsize.avg as f64);
            metrics::gauge!("kafka_produce_avg_batch_size_events", "topic" => topic)
                .set(stats.batchcnt.avg as f64);
        }
    }
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        )
        .set(
            "queue.buffering.max.messages",
            config.kafka_producer_queue_messages.to_string(),
        )
        .set("acks", config.kafka_producer_acks.to_owned());

    if config.kafka_producer_idempotence {
        client_config
            .set("enable.idempotence", "true")
            .set("retries", i32::MAX.to_string());
    }

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext)?;

    // "Ping" the Kafka brokers by requesting metadata
    match producer
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(producer)
}
