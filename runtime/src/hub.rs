//! `FanoutHub` — the concurrency nucleus.
//!
//! A single demux task owns the consumer's delivery sink and classifies
//! every record by topic: commands fan out to the command broadcast
//! group, events fan out to the event broadcast group *and* resolve any
//! waiter registered for the event's `parent`. See
//! [`FanoutHub::await_event_by_parent`] for the correlation contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cqrsbus_core::{Command, ConsumerError, Event, LogConsumer, LogRecord};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broadcast::{sliding_channel, BroadcastGroup, SlidingReceiver};

/// Default depth of the demux task's internal channel from the consumer
/// adapter. Independent of any subscriber's sliding-buffer capacity.
const CONSUMER_CHANNEL_DEPTH: usize = 256;

/// The concurrency nucleus: demultiplexes one consumed stream of
/// commands and events into per-subscriber broadcast groups, and
/// correlates events back to outstanding synchronous waiters.
pub struct FanoutHub {
    commands_topic: String,
    events_topic: String,
    commands: BroadcastGroup<Command>,
    events: BroadcastGroup<Event>,
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<Event>>>,
    shut_down: AtomicBool,
    shutdown_token: CancellationToken,
}

impl FanoutHub {
    /// Spawn the demux task over `consumer` and return the hub handle
    /// immediately. `commands_topic`/`events_topic` classify incoming
    /// records; a record on neither topic is logged and dropped.
    #[must_use]
    pub fn spawn(
        consumer: Arc<dyn LogConsumer>,
        commands_topic: impl Into<String>,
        events_topic: impl Into<String>,
    ) -> Arc<Self> {
        let hub = Arc::new(Self {
            commands_topic: commands_topic.into(),
            events_topic: events_topic.into(),
            commands: BroadcastGroup::new(),
            events: BroadcastGroup::new(),
            waiters: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
        });

        let task_hub = Arc::clone(&hub);
        tokio::spawn(async move { task_hub.run_demux(consumer).await });

        hub
    }

    /// Own the consumer's delivery sink until either the consumer ends
    /// the stream, a fatal consumer error is reported, or
    /// [`shutdown`](Self::shutdown) is called directly (e.g. by a caller
    /// that never closes the consumer side at all). The
    /// `shutdown_token` race is what makes a direct `shutdown()` call
    /// actually stop this task, rather than merely clearing the
    /// broadcast groups and waiter map while the loop keeps running.
    async fn run_demux(self: Arc<Self>, consumer: Arc<dyn LogConsumer>) {
        let (tx, mut rx) = mpsc::channel(CONSUMER_CHANNEL_DEPTH);
        let consumer_handle = tokio::spawn(async move { consumer.drain(tx).await });

        loop {
            let delivered = tokio::select! {
                biased;
                () = self.shutdown_token.cancelled() => None,
                delivered = rx.recv() => delivered,
            };

            match delivered {
                Some(Ok(record)) => self.handle_record(record),
                Some(Err(ConsumerError::Transport { topic, reason })) => {
                    tracing::warn!(topic, reason, "transport error consuming record");
                }
                Some(Err(ConsumerError::Fatal(reason))) => {
                    tracing::error!(reason, "consumer fatal, shutting down hub");
                    break;
                }
                None => break,
            }
        }

        self.shutdown();
        consumer_handle.abort();
        match consumer_handle.await {
            Ok(Ok(())) | Err(_) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "consumer task ended with error"),
        }
    }

    fn handle_record(&self, record: LogRecord) {
        if record.topic == self.commands_topic {
            self.commands.broadcast(&Command::from_record(&record));
            return;
        }
        if record.topic != self.events_topic {
            tracing::warn!(topic = %record.topic, "record on unclassified topic, dropping");
            return;
        }
        match Event::from_record(&record) {
            Ok(event) => {
                let waiter = {
                    let mut waiters = lock(&self.waiters);
                    waiters.remove(&event.parent)
                };
                if let Some(waiter) = waiter {
                    let _ = waiter.send(event.clone());
                }
                self.events.broadcast(&event);
            }
            Err(reason) => tracing::warn!(reason, "malformed event record, dropping"),
        }
    }

    /// Subscribe to the command broadcast group with the given
    /// sliding-buffer capacity. Records appended before this call are
    /// not delivered. Once the hub has [`shutdown`](Self::shutdown), new
    /// subscribes are rejected: this returns an already-closed receiver
    /// (`recv` resolves to `None` immediately) rather than a live one.
    #[must_use]
    pub fn subscribe_commands(&self, capacity: usize) -> SlidingReceiver<Command> {
        if self.is_shut_down() {
            return closed_receiver(capacity);
        }
        self.commands.subscribe(capacity)
    }

    /// Subscribe to the event broadcast group. Symmetric to
    /// [`subscribe_commands`](Self::subscribe_commands).
    #[must_use]
    pub fn subscribe_events(&self, capacity: usize) -> SlidingReceiver<Event> {
        if self.is_shut_down() {
            return closed_receiver(capacity);
        }
        self.events.subscribe(capacity)
    }

    /// Register a one-shot waiter for the first event carrying
    /// `parent == parent_id`. Takes effect immediately (unlike awaiting
    /// a lazily-polled future), so callers that must register before a
    /// side-effecting step — `Commander`'s synchronous create registers
    /// before appending the command — call this directly rather than
    /// going through [`await_event_by_parent`](Self::await_event_by_parent).
    ///
    /// Once the hub has [`shutdown`](Self::shutdown), registration is
    /// rejected: the returned receiver resolves as if timed out (its
    /// sender is dropped immediately) rather than ever being inserted
    /// into the waiter map, so a post-shutdown registration can never be
    /// satisfied by a later event.
    pub fn register_waiter(&self, parent_id: Uuid) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        if self.is_shut_down() {
            return rx;
        }
        lock(&self.waiters).insert(parent_id, tx);
        metrics::counter!("cqrsbus_waiters_registered_total").increment(1);
        rx
    }

    /// Wait on a waiter previously returned by
    /// [`register_waiter`](Self::register_waiter), resolving to
    /// `Some(event)` if matched before `deadline`, `None` on timeout or
    /// hub shutdown. Always unregisters the waiter before returning.
    pub async fn wait_for_waiter(
        &self,
        parent_id: Uuid,
        rx: oneshot::Receiver<Event>,
        deadline: Instant,
    ) -> Option<Event> {
        tokio::select! {
            result = rx => {
                let event = result.ok();
                let outcome = if event.is_some() { "completed" } else { "shutdown" };
                metrics::counter!("cqrsbus_waiters_resolved_total", "outcome" => outcome).increment(1);
                event
            }
            () = tokio::time::sleep_until(deadline) => {
                lock(&self.waiters).remove(&parent_id);
                metrics::counter!("cqrsbus_waiters_resolved_total", "outcome" => "timeout").increment(1);
                None
            }
        }
    }

    /// Register a waiter for `parent_id` and wait for it, end to end.
    /// Equivalent to calling [`register_waiter`](Self::register_waiter)
    /// immediately followed by
    /// [`wait_for_waiter`](Self::wait_for_waiter).
    pub async fn await_event_by_parent(&self, parent_id: Uuid, deadline: Instant) -> Option<Event> {
        let rx = self.register_waiter(parent_id);
        self.wait_for_waiter(parent_id, rx, deadline).await
    }

    /// Remove a waiter without waiting for it, used when a caller
    /// cancels a synchronous create while it is still registered.
    pub fn unregister_waiter(&self, parent_id: &Uuid) {
        lock(&self.waiters).remove(parent_id);
    }

    /// The number of waiters currently registered. Exposed for tests
    /// asserting the "no leaks" invariant.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        lock(&self.waiters).len()
    }

    /// Terminal: stop the demux task (so it releases the consumer's
    /// delivery sink rather than continuing to run), close every
    /// broadcast subscriber, drop every outstanding waiter (which
    /// resolves their `await` as a timeout, since a dropped
    /// `oneshot::Sender` yields `Err` on the receiving end), and reject
    /// every subsequent `subscribe_commands`/`subscribe_events`/
    /// `register_waiter` call. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_token.cancel();
        self.commands.close_all();
        self.events.close_all();
        lock(&self.waiters).clear();
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// Build a [`SlidingReceiver`] whose sender is already closed, for
/// `subscribe_commands`/`subscribe_events` calls made after
/// [`FanoutHub::shutdown`]: `recv` resolves to `None` on the caller's
/// first poll instead of the call silently joining a live broadcast
/// group that no demux task is still feeding.
fn closed_receiver<T>(capacity: usize) -> SlidingReceiver<T> {
    let (tx, rx) = sliding_channel(capacity);
    tx.close();
    rx
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cqrsbus_core::{LogProducer, LogValue, OutboundRecord};
    use cqrsbus_testing::InMemoryBroker;
    use std::time::Duration;

    fn hub_with_broker() -> (Arc<FanoutHub>, Arc<InMemoryBroker>, cqrsbus_testing::InMemoryLogProducer) {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = broker.producer();
        let consumer = broker.consumer(vec!["commands".to_string(), "events".to_string()]);
        let hub = FanoutHub::spawn(Arc::new(consumer), "commands", "events");
        (hub, broker, producer)
    }

    #[tokio::test]
    async fn command_subscriber_observes_appended_command() {
        let (hub, _broker, producer) = hub_with_broker();
        let mut sub = hub.subscribe_commands(10);
        tokio::task::yield_now().await;

        let id = Uuid::now_v7();
        producer
            .append(OutboundRecord::new(
                "commands".to_string(),
                id,
                LogValue::command("ship".to_string(), serde_json::json!({})),
            ))
            .await
            .expect("append should succeed");

        let command = sub.recv().await.expect("should receive command");
        assert_eq!(command.id, id);
    }

    #[tokio::test]
    async fn waiter_is_satisfied_by_matching_event() {
        let (hub, _broker, producer) = hub_with_broker();

        let parent = Uuid::now_v7();
        let deadline = Instant::now() + Duration::from_secs(5);
        let wait = hub.await_event_by_parent(parent, deadline);

        tokio::task::yield_now().await;
        producer
            .append(OutboundRecord::new(
                "events".to_string(),
                Uuid::now_v7(),
                LogValue::event("shipped".to_string(), serde_json::json!({}), parent),
            ))
            .await
            .expect("append should succeed");

        let event = wait.await.expect("should observe event");
        assert_eq!(event.parent, parent);
        assert_eq!(hub.waiter_count(), 0);
    }

    #[tokio::test]
    async fn waiter_times_out_without_matching_event() {
        let (hub, _broker, _producer) = hub_with_broker();

        let parent = Uuid::now_v7();
        let deadline = Instant::now() + Duration::from_millis(20);
        let result = hub.await_event_by_parent(parent, deadline).await;

        assert!(result.is_none());
        assert_eq!(hub.waiter_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_resolves_pending_waiters_as_timeout() {
        let (hub, _broker, _producer) = hub_with_broker();

        let parent = Uuid::now_v7();
        let deadline = Instant::now() + Duration::from_secs(30);
        let wait = hub.await_event_by_parent(parent, deadline);

        tokio::task::yield_now().await;
        hub.shutdown();

        assert!(wait.await.is_none());
        assert!(hub.is_shut_down());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (hub, _broker, _producer) = hub_with_broker();
        hub.shutdown();
        hub.shutdown();
        assert!(hub.is_shut_down());
    }

    #[tokio::test]
    async fn subscribe_commands_after_shutdown_returns_closed_receiver() {
        let (hub, _broker, _producer) = hub_with_broker();
        hub.shutdown();

        let mut sub = hub.subscribe_commands(10);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn subscribe_events_after_shutdown_returns_closed_receiver() {
        let (hub, _broker, _producer) = hub_with_broker();
        hub.shutdown();

        let mut sub = hub.subscribe_events(10);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn register_waiter_after_shutdown_is_never_satisfied() {
        let (hub, _broker, producer) = hub_with_broker();
        hub.shutdown();

        let parent = Uuid::now_v7();
        let rx = hub.register_waiter(parent);
        assert_eq!(hub.waiter_count(), 0, "shutdown hub must not retain new waiters");

        // A matching event produced after shutdown must not resurrect the
        // registration.
        let _ = producer
            .append(OutboundRecord::new(
                "events".to_string(),
                Uuid::now_v7(),
                LogValue::event("shipped".to_string(), serde_json::json!({}), parent),
            ))
            .await;

        assert!(rx.await.is_err(), "sender must already be dropped");
    }

    #[tokio::test]
    async fn shutdown_stops_new_command_subscribers_from_observing_later_records() {
        let (hub, _broker, producer) = hub_with_broker();
        let mut pre_shutdown_sub = hub.subscribe_commands(10);
        tokio::task::yield_now().await;

        hub.shutdown();
        tokio::task::yield_now().await;

        // The demux task itself must have stopped: a record appended
        // after shutdown never reaches even a subscriber that joined
        // before shutdown.
        let _ = producer
            .append(OutboundRecord::new(
                "commands".to_string(),
                Uuid::now_v7(),
                LogValue::command("ship".to_string(), serde_json::json!({})),
            ))
            .await;

        assert_eq!(pre_shutdown_sub.recv().await, None);

        let mut post_shutdown_sub = hub.subscribe_commands(10);
        assert_eq!(post_shutdown_sub.recv().await, None);
    }
}
