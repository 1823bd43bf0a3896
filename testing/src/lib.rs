//! # cqrsbus testing
//!
//! In-memory fakes of the `cqrsbus-core` adapter traits ([`LogProducer`],
//! [`LogConsumer`], [`IndexReader`]), for fast, deterministic tests of
//! `cqrsbus-runtime`'s `FanoutHub` and `Commander` without a real broker
//! or database.
//!
//! [`InMemoryBroker`] is the shared backbone: every [`InMemoryLogProducer`]
//! append is broadcast to every live [`InMemoryLogConsumer::drain`] call
//! and recorded for [`InMemoryIndexReader`] to serve back, the same way a
//! real broker's append is both streamed to consumers and eventually
//! reflected in a downstream index.
//!
//! # Example
//!
//! ```
//! use cqrsbus_testing::InMemoryBroker;
//!
//! let broker = InMemoryBroker::new();
//! let producer = broker.producer();
//! let consumer = broker.consumer(vec!["commands".to_string()]);
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use cqrsbus_core::{
    AppendAck, Command, ConsumerError, Event, IndexError, IndexReader, LogConsumer, LogProducer,
    LogRecord, LogRecordSink, OutboundRecord, Page, ProducerError,
};
use tokio::sync::broadcast;

type TopicLog = HashMap<String, Vec<LogRecord>>;

/// A source of the millisecond timestamps a [`LogProducer`] stamps appends
/// with. Production code has exactly one implementation ([`SystemClock`]);
/// tests that assert on `timestamp` fields use [`FixedClock`] instead of
/// racing the wall clock.
pub trait Clock: Send + Sync {
    /// Current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// [`Clock`] backed by [`std::time::SystemTime::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        current_millis()
    }
}

/// [`Clock`] that only advances when told to. Starts at `0` unless
/// constructed with [`FixedClock::new`].
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    /// Create a clock fixed at `millis`.
    #[must_use]
    pub const fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Move the clock forward (or backward) by `delta_millis`.
    pub fn advance(&self, delta_millis: i64) {
        self.millis.fetch_add(delta_millis, Ordering::SeqCst);
    }

    /// Pin the clock to an absolute value.
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

struct BrokerState {
    topics: TopicLog,
}

/// A shared, in-memory stand-in for a broker: appends are stored in
/// per-topic order (for [`InMemoryIndexReader`]) and broadcast live (for
/// [`InMemoryLogConsumer`]).
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    tx: broadcast::Sender<LogRecord>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a new, empty broker, timestamping appends from [`SystemClock`].
    /// Broadcast capacity is generous (1024) since this fake has no real
    /// network buffering to bound it.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new, empty broker timestamping appends from `clock`, e.g. a
    /// [`FixedClock`] for deterministic assertions on `timestamp` fields.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            state: Mutex::new(BrokerState {
                topics: HashMap::new(),
            }),
            tx,
            clock,
        }
    }

    /// Wrap this broker (via `Arc`) in a [`LogProducer`].
    #[must_use]
    pub fn producer(self: &Arc<Self>) -> InMemoryLogProducer {
        InMemoryLogProducer {
            broker: Arc::clone(self),
        }
    }

    /// Wrap this broker (via `Arc`) in a [`LogConsumer`] subscribed to
    /// `topics`.
    #[must_use]
    pub fn consumer(self: &Arc<Self>, topics: Vec<String>) -> InMemoryLogConsumer {
        InMemoryLogConsumer {
            broker: Arc::clone(self),
            topics,
        }
    }

    /// Wrap this broker (via `Arc`) in an [`IndexReader`] over `commands`
    /// and `events` topics.
    #[must_use]
    pub fn index_reader(
        self: &Arc<Self>,
        commands_topic: impl Into<String>,
        events_topic: impl Into<String>,
    ) -> InMemoryIndexReader {
        InMemoryIndexReader {
            broker: Arc::clone(self),
            commands_topic: commands_topic.into(),
            events_topic: events_topic.into(),
        }
    }

    #[allow(clippy::unwrap_used)] // poisoned-mutex is a fatal test bug, not a recoverable case
    fn append(&self, record: OutboundRecord, timestamp_ms: i64) -> LogRecord {
        let mut state = self.state.lock().unwrap();
        let log = state.topics.entry(record.topic.clone()).or_default();
        #[allow(clippy::cast_possible_wrap)]
        let offset = log.len() as i64;
        let stored = LogRecord {
            topic: record.topic,
            key: record.key,
            value: record.value,
            partition: 0,
            offset,
            timestamp: timestamp_ms,
        };
        log.push(stored.clone());
        drop(state);
        // No receivers is a normal, not an error: nothing is draining yet.
        let _ = self.tx.send(stored.clone());
        stored
    }

    #[allow(clippy::unwrap_used)]
    fn records_for(&self, topic: &str, offset: u64, limit: u64) -> (Vec<LogRecord>, u64) {
        let state = self.state.lock().unwrap();
        let Some(log) = state.topics.get(topic) else {
            return (Vec::new(), 0);
        };
        let total = log.len() as u64;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(log.len());
        let end = if limit == 0 {
            log.len()
        } else {
            let limit = usize::try_from(limit).unwrap_or(usize::MAX);
            start.saturating_add(limit).min(log.len())
        };
        (log[start..end].to_vec(), total)
    }

    #[allow(clippy::unwrap_used)]
    fn record_by_key(&self, topic: &str, key: uuid::Uuid) -> Option<LogRecord> {
        let state = self.state.lock().unwrap();
        state
            .topics
            .get(topic)?
            .iter()
            .find(|record| record.key == key)
            .cloned()
    }
}

/// In-memory [`LogProducer`]. Appends are immediately visible to
/// [`InMemoryIndexReader`] and broadcast to any live
/// [`InMemoryLogConsumer::drain`] call.
#[derive(Clone)]
pub struct InMemoryLogProducer {
    broker: Arc<InMemoryBroker>,
}

impl LogProducer for InMemoryLogProducer {
    fn append(
        &self,
        record: OutboundRecord,
    ) -> Pin<Box<dyn Future<Output = Result<AppendAck, ProducerError>> + Send + '_>> {
        Box::pin(async move {
            let timestamp_ms = self.broker.clock.now_millis();
            let topic = record.topic.clone();
            let stored = self.broker.append(record, timestamp_ms);
            Ok(AppendAck {
                topic,
                partition: stored.partition,
                offset: stored.offset,
                timestamp: stored.timestamp,
            })
        })
    }
}

/// In-memory [`LogConsumer`] over a fixed set of topics.
#[derive(Clone)]
pub struct InMemoryLogConsumer {
    broker: Arc<InMemoryBroker>,
    topics: Vec<String>,
}

impl LogConsumer for InMemoryLogConsumer {
    fn drain(
        &self,
        sink: LogRecordSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConsumerError>> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.broker.tx.subscribe();
            loop {
                match rx.recv().await {
                    Ok(record) => {
                        if !self.topics.iter().any(|t| t == &record.topic) {
                            continue;
                        }
                        if sink.send(Ok(record)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if sink
                            .send(Err(ConsumerError::Transport {
                                topic: self.topics.join(","),
                                reason: "consumer lagged behind broadcast buffer".to_string(),
                            }))
                            .await
                            .is_err()
                        {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        })
    }
}

/// In-memory [`IndexReader`], reading directly from [`InMemoryBroker`]'s
/// append-ordered storage rather than a separately-populated table —
/// acceptable for tests, where there is no out-of-band indexer lag to
/// model.
#[derive(Clone)]
pub struct InMemoryIndexReader {
    broker: Arc<InMemoryBroker>,
    commands_topic: String,
    events_topic: String,
}

impl IndexReader for InMemoryIndexReader {
    fn list_commands(
        &self,
        offset: u64,
        limit: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Page<Command>, IndexError>> + Send + '_>> {
        Box::pin(async move {
            let (records, total) = self.broker.records_for(&self.commands_topic, offset, limit);
            Ok(Page {
                items: records.iter().map(Command::from_record).collect(),
                offset,
                limit,
                total,
            })
        })
    }

    fn get_command(
        &self,
        id: uuid::Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Command>, IndexError>> + Send + '_>> {
        Box::pin(async move {
            Ok(self
                .broker
                .record_by_key(&self.commands_topic, id)
                .as_ref()
                .map(Command::from_record))
        })
    }

    fn list_events(
        &self,
        offset: u64,
        limit: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Page<Event>, IndexError>> + Send + '_>> {
        Box::pin(async move {
            let (records, total) = self.broker.records_for(&self.events_topic, offset, limit);
            let items = records
                .iter()
                .map(|record| {
                    Event::from_record(record)
                        .map_err(IndexError::Deserialization)
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Page {
                items,
                offset,
                limit,
                total,
            })
        })
    }

    fn get_event(
        &self,
        id: uuid::Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, IndexError>> + Send + '_>> {
        Box::pin(async move {
            match self.broker.record_by_key(&self.events_topic, id) {
                Some(record) => Event::from_record(&record)
                    .map(Some)
                    .map_err(IndexError::Deserialization),
                None => Ok(None),
            }
        })
    }
}

fn current_millis() -> i64 {
    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    millis
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cqrsbus_core::LogValue;

    #[tokio::test]
    async fn producer_append_is_visible_to_index_reader() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = broker.producer();
        let reader = broker.index_reader("commands", "events");

        let id = uuid::Uuid::now_v7();
        let ack = producer
            .append(OutboundRecord::new(
                "commands".to_string(),
                id,
                LogValue::command("ship".to_string(), serde_json::json!({"sku": "x"})),
            ))
            .await
            .expect("append should succeed");
        assert_eq!(ack.offset, 0);

        let found = reader
            .get_command(id)
            .await
            .expect("lookup should succeed")
            .expect("command should be indexed");
        assert_eq!(found.action, "ship");
    }

    #[tokio::test]
    async fn consumer_receives_appended_records() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = broker.producer();
        let consumer = broker.consumer(vec!["commands".to_string()]);

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let handle = tokio::spawn(async move { consumer.drain(tx).await });

        // Give the consumer task a chance to subscribe before appending.
        tokio::task::yield_now().await;

        let id = uuid::Uuid::now_v7();
        producer
            .append(OutboundRecord::new(
                "commands".to_string(),
                id,
                LogValue::command("ship".to_string(), serde_json::json!({})),
            ))
            .await
            .expect("append should succeed");

        let received = rx.recv().await.expect("should receive record").expect("no error");
        assert_eq!(received.key, id);

        drop(rx);
        let _ = handle.await;
    }

    #[tokio::test]
    async fn list_commands_limit_zero_returns_all() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = broker.producer();
        let reader = broker.index_reader("commands", "events");

        for _ in 0..5 {
            producer
                .append(OutboundRecord::new(
                    "commands".to_string(),
                    uuid::Uuid::now_v7(),
                    LogValue::command("noop".to_string(), serde_json::json!({})),
                ))
                .await
                .expect("append should succeed");
        }

        let page = reader.list_commands(0, 0).await.expect("list should succeed");
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.total, 5);
    }

    #[tokio::test]
    async fn fixed_clock_stamps_appends_deterministically() {
        let clock = Arc::new(FixedClock::new(1_000));
        let broker = Arc::new(InMemoryBroker::with_clock(clock.clone()));
        let producer = broker.producer();

        let ack = producer
            .append(OutboundRecord::new(
                "commands".to_string(),
                uuid::Uuid::now_v7(),
                LogValue::command("ship".to_string(), serde_json::json!({})),
            ))
            .await
            .expect("append should succeed");
        assert_eq!(ack.timestamp, 1_000);

        clock.advance(500);
        let ack = producer
            .append(OutboundRecord::new(
                "commands".to_string(),
                uuid::Uuid::now_v7(),
                LogValue::command("ship".to_string(), serde_json::json!({})),
            ))
            .await
            .expect("append should succeed");
        assert_eq!(ack.timestamp, 1_500);

        clock.set(42);
        let ack = producer
            .append(OutboundRecord::new(
                "commands".to_string(),
                uuid::Uuid::now_v7(),
                LogValue::command("ship".to_string(), serde_json::json!({})),
            ))
            .await
            .expect("append should succeed");
        assert_eq!(ack.timestamp, 42);
    }
}
