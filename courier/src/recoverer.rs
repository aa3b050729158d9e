use rdkafka::message::Headers;
use rdkafka::Message;
use tracing::warn;

use crate::config::MessagingConfig;
use crate::error::SinkError;
use crate::headers;
use crate::sink::{MessageSink, OutboundRecord};

const MAX_FAILURE_MESSAGE_LEN: usize = 256;

/// Routes poison messages through tiered retry topics into the dead letter.
///
/// The republish never blocks or influences the commit of the failed offset;
/// offset progression stays with the dispatcher.
pub struct RetryRecoverer<S: MessageSink> {
    sink: S,
    retry_enabled: bool,
    delay_labels: Vec<String>,
    dlq_suffix: String,
}

impl<S: MessageSink> RetryRecoverer<S> {
    pub fn new(sink: S, config: &MessagingConfig) -> Self {
        Self {
            sink,
            retry_enabled: config.retry_enabled,
            delay_labels: config.retry_topic_delays.as_slice().to_vec(),
            dlq_suffix: config.dlq_suffix.clone(),
        }
    }

    /// Classifies the failure and republishes the record unchanged to the
    /// next tier (or the dead letter), restamping the reserved headers.
    pub async fn accept<M, E>(&self, record: &M, error: &E) -> Result<(), SinkError>
    where
        M: Message,
        E: std::error::Error,
    {
        let mut record_headers = decode_headers(record);
        let retry_count = read_retry_count(&record_headers);
        let target_topic = self.resolve_target_topic(record.topic(), retry_count);

        headers::replace_header(
            &mut record_headers,
            headers::RETRY_COUNT,
            (retry_count + 1).to_string(),
        );
        headers::add_if_absent(
            &mut record_headers,
            headers::ORIGINAL_TOPIC,
            record.topic().to_owned(),
        );
        headers::add_if_absent(
            &mut record_headers,
            headers::ORIGINAL_PARTITION,
            record.partition().to_string(),
        );
        headers::add_if_absent(
            &mut record_headers,
            headers::ORIGINAL_OFFSET,
            record.offset().to_string(),
        );
        headers::replace_header(
            &mut record_headers,
            headers::FAILURE_CLASS,
            std::any::type_name::<E>().to_owned(),
        );
        headers::replace_header(
            &mut record_headers,
            headers::FAILURE_MESSAGE,
            sanitize(&error.to_string()),
        );

        let outbound = OutboundRecord {
            topic: target_topic.clone(),
            partition: Some(record.partition()),
            key: record
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: record.payload().map(|payload| payload.to_vec()),
            headers: record_headers,
        };

        warn!(
            topic = record.topic(),
            target = target_topic.as_str(),
            retry_count,
            "routing failed record"
        );
        self.sink.send(outbound).await?;
        metrics::counter!("courier_records_recovered_total", "target" => target_topic)
            .increment(1);

        Ok(())
    }

    fn resolve_target_topic(&self, topic: &str, retry_count: usize) -> String {
        if !self.retry_enabled {
            return format!("{}.{}", topic, self.dlq_suffix);
        }
        if let Some(label) = self.delay_labels.get(retry_count) {
            return format!("{}.retry.{}", topic, label);
        }
        format!("{}.{}", topic, self.dlq_suffix)
    }
}

fn decode_headers<M: Message>(record: &M) -> Vec<(String, String)> {
    let mut decoded = Vec::new();
    if let Some(raw_headers) = record.headers() {
        for header in raw_headers.iter() {
            if let Some(value) = header.value {
                decoded.push((
                    header.key.to_owned(),
                    String::from_utf8_lossy(value).into_owned(),
                ));
            }
        }
    }
    decoded
}

fn read_retry_count(record_headers: &[(String, String)]) -> usize {
    headers::last_header(record_headers, headers::RETRY_COUNT)
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Line breaks collapse to single spaces; the result is capped at 256 chars.
fn sanitize(message: &str) -> String {
    let mut collapsed = String::with_capacity(message.len());
    let mut last_was_break = false;
    for c in message.chars() {
        if c == '\r' || c == '\n' {
            if !last_was_break {
                collapsed.push(' ');
            }
            last_was_break = true;
        } else {
            collapsed.push(c);
            last_was_break = false;
        }
    }

    if collapsed.chars().count() > MAX_FAILURE_MESSAGE_LEN {
        collapsed.chars().take(MAX_FAILURE_MESSAGE_LEN).collect()
    } else {
        collapsed
    }
}
