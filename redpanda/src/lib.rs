//! Redpanda (Kafka-protocol) adapters for `cqrsbus-core`'s
//! [`LogProducer`] and [`LogConsumer`] traits, built on `rdkafka`.
//!
//! # Why Redpanda
//!
//! - Kafka-compatible: works with Redpanda, Apache Kafka, MSK, Event Hubs.
//! - Self-hostable, simpler to operate than Kafka.
//!
//! # Wire encoding
//!
//! The record key is the entity UUID's string form; the value is
//! [`cqrsbus_core::LogValue`] encoded as JSON (see `cqrsbus-core`'s own
//! rationale for JSON over the aggregate-replay `bincode` encoding used
//! elsewhere in this workspace).
//!
//! # Delivery semantics
//!
//! At-least-once, with manual offset commits: an offset is only
//! committed after the decoded record has been handed to the caller's
//! sink. A crash between delivery and commit causes redelivery on
//! restart; callers downstream of [`FanoutHub`](https://docs.rs/cqrsbus-runtime)
//! tolerate duplicates per `cqrsbus-core`'s `LogConsumer` contract.
//!
//! # Example
//!
//! ```no_run
//! use cqrsbus_redpanda::RedpandaLogProducer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let producer = RedpandaLogProducer::builder()
//!     .brokers("localhost:9092")
//!     .compression("lz4")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use cqrsbus_core::{AppendAck, ConsumerError, LogConsumer, LogProducer, LogRecord, LogRecordSink, LogValue, OutboundRecord, ProducerError};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use uuid::Uuid;

/// [`LogProducer`] over a Kafka-protocol broker.
pub struct RedpandaLogProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl RedpandaLogProducer {
    /// Create a producer with default configuration for `brokers`.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::Transport`] if the underlying client
    /// cannot be constructed (invalid broker addresses, bad config).
    pub fn new(brokers: &str) -> Result<Self, ProducerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start building a producer with custom configuration.
    #[must_use]
    pub fn builder() -> RedpandaProducerBuilder {
        RedpandaProducerBuilder::default()
    }
}

impl LogProducer for RedpandaLogProducer {
    fn append(
        &self,
        record: OutboundRecord,
    ) -> Pin<Box<dyn Future<Output = Result<AppendAck, ProducerError>> + Send + '_>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(&record.value).map_err(|err| {
                ProducerError::BrokerRejected {
                    topic: record.topic.clone(),
                    reason: format!("failed to serialize record value: {err}"),
                }
            })?;

            let key = record.key.to_string();
            #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
            let timestamp_ms = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);

            let kafka_record = FutureRecord::to(&record.topic)
                .payload(&payload)
                .key(key.as_bytes())
                .timestamp(timestamp_ms);

            match self.producer.send(kafka_record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %record.topic,
                        partition,
                        offset,
                        key = %record.key,
                        "record appended"
                    );
                    Ok(AppendAck {
                        topic: record.topic,
                        partition,
                        offset,
                        timestamp: timestamp_ms,
                    })
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %record.topic, error = %kafka_error, "append failed");
                    Err(ProducerError::Transport {
                        topic: record.topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }
}

/// Builder for [`RedpandaLogProducer`].
#[derive(Default)]
pub struct RedpandaProducerBuilder {
    brokers: Option<String>,
    acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaProducerBuilder {
    /// Comma-separated broker addresses, e.g. `"localhost:9092"`.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` (default), or `"all"`.
    #[must_use]
    pub fn acks(mut self, acks: impl Into<String>) -> Self {
        self.acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"` (default), `"gzip"`, `"snappy"`,
    /// `"lz4"`, `"zstd"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Per-append send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the producer.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::Transport`] if brokers are unset or the
    /// underlying client cannot be constructed.
    pub fn build(self) -> Result<RedpandaLogProducer, ProducerError> {
        let brokers = self.brokers.ok_or_else(|| ProducerError::Transport {
            topic: String::new(),
            reason: "brokers not configured".to_string(),
        })?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", self.acks.as_deref().unwrap_or("1"))
            .set("compression.type", self.compression.as_deref().unwrap_or("none"))
            .create()
            .map_err(|err| ProducerError::Transport {
                topic: String::new(),
                reason: format!("failed to create producer: {err}"),
            })?;

        tracing::info!(brokers = %brokers, "RedpandaLogProducer created");

        Ok(RedpandaLogProducer {
            producer,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

/// [`LogConsumer`] over a fixed set of topics on a Kafka-protocol
/// broker. Commits offsets manually, only after a record is handed to
/// the caller's sink.
pub struct RedpandaLogConsumer {
    brokers: String,
    topics: Vec<String>,
    consumer_group: Option<String>,
    auto_offset_reset: String,
}

impl RedpandaLogConsumer {
    /// Create a consumer over `topics` with default configuration.
    #[must_use]
    pub fn new(brokers: impl Into<String>, topics: Vec<String>) -> Self {
        Self::builder(brokers, topics).build()
    }

    /// Start building a consumer with custom configuration.
    #[must_use]
    pub fn builder(brokers: impl Into<String>, topics: Vec<String>) -> RedpandaConsumerBuilder {
        RedpandaConsumerBuilder {
            brokers: brokers.into(),
            topics,
            consumer_group: None,
            auto_offset_reset: None,
        }
    }
}

impl LogConsumer for RedpandaLogConsumer {
    fn drain(
        &self,
        sink: LogRecordSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConsumerError>> + Send + '_>> {
        Box::pin(async move {
            let consumer_group_id = self.consumer_group.clone().unwrap_or_else(|| {
                let mut sorted = self.topics.clone();
                sorted.sort();
                format!("cqrsbus-{}", sorted.join("-"))
            });

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|err| ConsumerError::Fatal(format!("failed to create consumer: {err}")))?;

            let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|err| ConsumerError::Fatal(format!("failed to subscribe: {err}")))?;

            tracing::info!(topics = ?self.topics, consumer_group = %consumer_group_id, "subscribed to topics");

            use futures::StreamExt;
            use rdkafka::consumer::CommitMode;

            let mut stream = consumer.stream();
            while let Some(msg_result) = stream.next().await {
                let delivered = match msg_result {
                    Ok(message) => decode_message(&message).map_err(|reason| ConsumerError::Transport {
                        topic: message.topic().to_string(),
                        reason,
                    }),
                    Err(err) => Err(ConsumerError::Transport {
                        topic: self.topics.join(","),
                        reason: err.to_string(),
                    }),
                };

                let message_for_commit = if let Ok(record) = &delivered {
                    Some((record.partition, record.offset))
                } else {
                    None
                };

                if sink.send(delivered).await.is_err() {
                    tracing::debug!("sink closed, exiting consumer loop without committing");
                    return Ok(());
                }

                if let Some((partition, offset)) = message_for_commit {
                    commit(&consumer, &self.topics, partition, offset);
                }
            }

            Ok(())
        })
    }
}

fn commit(consumer: &StreamConsumer, topics: &[String], partition: i32, offset: i64) {
    use rdkafka::topic_partition_list::TopicPartitionList;
    use rdkafka::Offset;

    let Some(topic) = topics.first() else {
        return;
    };
    let mut assignment = TopicPartitionList::new();
    if assignment
        .add_partition_offset(topic, partition, Offset::Offset(offset + 1))
        .is_err()
    {
        return;
    }
    if let Err(err) = consumer.commit(&assignment, CommitMode::Async) {
        tracing::warn!(topic, partition, offset, error = %err, "failed to commit offset, message may be redelivered");
    }
}

fn decode_message(message: &BorrowedMessage<'_>) -> Result<LogRecord, String> {
    let key_bytes = message.key().ok_or_else(|| "message has no key".to_string())?;
    let key_str =
        std::str::from_utf8(key_bytes).map_err(|err| format!("key is not valid utf-8: {err}"))?;
    let key = Uuid::parse_str(key_str).map_err(|err| format!("key is not a valid uuid: {err}"))?;

    let payload = message.payload().ok_or_else(|| "message has no payload".to_string())?;
    let value: LogValue = serde_json::from_slice(payload)
        .map_err(|err| format!("failed to deserialize record value: {err}"))?;

    Ok(LogRecord {
        topic: message.topic().to_string(),
        key,
        value,
        partition: message.partition(),
        offset: message.offset(),
        timestamp: message.timestamp().to_millis().unwrap_or(0),
    })
}

/// Builder for [`RedpandaLogConsumer`].
pub struct RedpandaConsumerBuilder {
    brokers: String,
    topics: Vec<String>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaConsumerBuilder {
    /// Explicit consumer group id. If unset, one is derived
    /// deterministically from the sorted topic list so repeated runs
    /// over the same topics join the same group.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or
    /// `"latest"` (default).
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the consumer. Connection to the broker is deferred to the
    /// first [`LogConsumer::drain`] call.
    #[must_use]
    pub fn build(self) -> RedpandaLogConsumer {
        RedpandaLogConsumer {
            brokers: self.brokers,
            topics: self.topics,
            consumer_group: self.consumer_group,
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<RedpandaLogProducer>();
        assert_sync::<RedpandaLogProducer>();
    }

    #[test]
    fn consumer_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<RedpandaLogConsumer>();
        assert_sync::<RedpandaLogConsumer>();
    }

    #[test]
    fn producer_builder_requires_brokers() {
        let result = RedpandaProducerBuilder::default().build();
        assert!(result.is_err());
    }

    #[test]
    fn consumer_builder_defaults_offset_reset_to_latest() {
        let consumer = RedpandaLogConsumer::builder("localhost:9092", vec!["commands".to_string()]).build();
        assert_eq!(consumer.auto_offset_reset, "latest");
    }

    #[test]
    fn consumer_group_derived_from_sorted_topics_when_unset() {
        let consumer = RedpandaLogConsumer::new(
            "localhost:9092",
            vec!["events".to_string(), "commands".to_string()],
        );
        assert!(consumer.consumer_group.is_none());
        assert_eq!(consumer.topics, vec!["events".to_string(), "commands".to_string()]);
    }
}
