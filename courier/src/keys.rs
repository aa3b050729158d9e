use serde::Serialize;
use uuid::Uuid;

use crate::config::{MessagingConfig, UnorderedKeyStrategy};
use crate::error::PublishError;

/// Capability contract every published payload implements.
///
/// Payloads destined for ordered topics override `ordering_key`; the resolver
/// refuses to publish to an ordered topic without one.
pub trait EventPayload: Serialize {
    /// The key that fixes this payload's partition on ordered topics.
    fn ordering_key(&self) -> Option<String> {
        None
    }

    /// Producer-declared classification, carried as the envelope `type`.
    fn event_type(&self) -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

/// Derives the partition key for a publish attempt.
pub struct KeyResolver {
    ordered_topics: Vec<String>,
    strategy: UnorderedKeyStrategy,
}

impl KeyResolver {
    pub fn new(config: &MessagingConfig) -> Self {
        Self {
            ordered_topics: config.ordered_topics.as_slice().to_vec(),
            strategy: config.unordered_key_strategy,
        }
    }

    /// An explicit non-blank key always wins. On ordered topics a missing key
    /// is an error: keyless delivery would round-robin across partitions and
    /// destroy per-key ordering.
    pub fn resolve<T: EventPayload>(
        &self,
        topic: &str,
        explicit_key: Option<&str>,
        payload: &T,
    ) -> Result<Option<String>, PublishError> {
        let explicit = explicit_key.filter(|key| !key.trim().is_empty());

        if self.is_ordered_topic(topic) {
            if let Some(key) = explicit {
                return Ok(Some(key.to_owned()));
            }
            return match payload.ordering_key().filter(|key| !key.trim().is_empty()) {
                Some(key) => Ok(Some(key)),
                None => Err(PublishError::MissingOrderingKey {
                    topic: topic.to_owned(),
                }),
            };
        }

        if let Some(key) = explicit {
            return Ok(Some(key.to_owned()));
        }
        match self.strategy {
            UnorderedKeyStrategy::None => Ok(None),
            UnorderedKeyStrategy::Random => Ok(Some(Uuid::now_v7().to_string())),
        }
    }

    fn is_ordered_topic(&self, topic: &str) -> bool {
        !topic.trim().is_empty() && self.ordered_topics.iter().any(|ordered| ordered == topic)
    }
}
