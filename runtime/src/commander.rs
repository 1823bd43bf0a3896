//! `Commander` — the public API composing a [`LogProducer`], the
//! [`FanoutHub`] (for both streaming and correlation), and an
//! [`IndexReader`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cqrsbus_core::{
    new_id, Command, CommandParams, Event, IndexError, IndexReader, LogProducer, LogValue,
    OutboundRecord, Page, ProducerError,
};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broadcast::SlidingReceiver;
use crate::config::Config;
use crate::hub::FanoutHub;

/// Per-field validation errors, keyed by the [`CommandParams`] field
/// they apply to. An empty map is never returned — a validator either
/// returns `Ok(())` or a non-empty map.
pub type ValidationErrors = HashMap<String, Vec<String>>;

/// Extension seam for rejecting a command before it is appended.
/// `Commander` is generic over this trait so a deploying adapter can
/// plug in real rules (schema checks, authorization, rate limits)
/// without modifying `Commander` itself.
pub trait CommandValidator: Send + Sync {
    /// Validate `params`, returning `Err` with one or more field errors
    /// to reject the command before any append is attempted.
    fn validate(&self, params: &CommandParams) -> Result<(), ValidationErrors>;
}

/// The default validator: accepts every command. Matches spec's "core
/// implementation accepts all" — real policy is expected to come from a
/// [`CommandValidator`] supplied via [`Commander::with_validator`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllValidator;

impl CommandValidator for AcceptAllValidator {
    fn validate(&self, _params: &CommandParams) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// Operational failures out of band from a returned [`Command`] —
/// distinct from the business outcomes (`timedout`, `error` field) a
/// successfully-appended command can carry.
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    /// `validateCommandParams` rejected the command before any append
    /// was attempted.
    #[error("command validation failed: {0:?}")]
    Validation(ValidationErrors),

    /// The producer append itself failed (transport, broker rejection,
    /// queue overflow, or a response channel that never resolved).
    #[error("append failed: {0}")]
    AppendFailed(#[from] ProducerError),

    /// The caller's `CancellationToken` fired while a synchronous create
    /// was still waiting on its producer ack or completion event. The
    /// producer append is not cancellable once issued; cancellation
    /// before the ack is observed still appends the command, it simply
    /// stops waiting for it.
    #[error("create cancelled")]
    Cancelled,
}

/// The public API: `createCommand` (async and synchronous), paginated
/// and point lookups over the read-side index, and live streaming of
/// both logs.
///
/// Generic over `V` so a real [`CommandValidator`] can be swapped in via
/// [`with_validator`](Self::with_validator) without changing the rest of
/// the API.
pub struct Commander<V: CommandValidator = AcceptAllValidator> {
    hub: Arc<FanoutHub>,
    producer: Arc<dyn LogProducer>,
    index: Arc<dyn IndexReader>,
    commands_topic: String,
    events_topic: String,
    sync_timeout: Duration,
    stream_buffer_size: usize,
    validator: V,
}

impl Commander<AcceptAllValidator> {
    /// Build a `Commander` over the given hub, producer, and index
    /// reader, configured from `config`. Starts out with
    /// [`AcceptAllValidator`]; call [`with_validator`](Self::with_validator)
    /// to attach real validation.
    #[must_use]
    pub fn new(
        hub: Arc<FanoutHub>,
        producer: Arc<dyn LogProducer>,
        index: Arc<dyn IndexReader>,
        config: &Config,
    ) -> Self {
        Self {
            hub,
            producer,
            index,
            commands_topic: config.commands_topic.clone(),
            events_topic: config.events_topic.clone(),
            sync_timeout: config.sync_timeout,
            stream_buffer_size: config.stream_buffer_size,
            validator: AcceptAllValidator,
        }
    }
}

impl<V: CommandValidator> Commander<V> {
    /// Replace the validator, returning a `Commander` parameterized over
    /// the new type.
    pub fn with_validator<W: CommandValidator>(self, validator: W) -> Commander<W> {
        Commander {
            hub: self.hub,
            producer: self.producer,
            index: self.index,
            commands_topic: self.commands_topic,
            events_topic: self.events_topic,
            sync_timeout: self.sync_timeout,
            stream_buffer_size: self.stream_buffer_size,
            validator,
        }
    }

    /// Run `params` through the attached [`CommandValidator`].
    ///
    /// # Errors
    ///
    /// Returns the validator's field errors map.
    pub fn validate_command_params(&self, params: &CommandParams) -> Result<(), ValidationErrors> {
        self.validator.validate(params)
    }

    /// Submit a command and return once the broker has durably accepted
    /// it — without waiting for any completion event.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`] or
    /// [`CommandError::AppendFailed`].
    #[tracing::instrument(skip(self, params), fields(action = %params.action))]
    pub async fn create_command(&self, params: CommandParams) -> Result<Command, CommandError> {
        self.validator
            .validate(&params)
            .map_err(CommandError::Validation)?;

        let id = new_id();
        let ack = self
            .producer
            .append(OutboundRecord::new(
                self.commands_topic.clone(),
                id,
                LogValue::command(params.action.clone(), params.data.clone()),
            ))
            .await?;

        tracing::debug!(command_id = %id, topic = %ack.topic, partition = ack.partition, offset = ack.offset, "command appended");

        Ok(Command::new(
            id,
            params.action,
            params.data,
            ack.timestamp,
            ack.topic,
            ack.partition,
            ack.offset,
        ))
    }

    /// Submit a command and wait up to `deadline_override` (falling back
    /// to the configured `sync-timeout-ms`) for its first completion
    /// event, correlated by `parent == id`.
    ///
    /// Follows the mandatory register-before-append sequence: the
    /// correlation waiter is registered on the hub *before* the append
    /// is issued, so a completion event produced concurrently with (or
    /// immediately after) the append is never missed.
    ///
    /// A timeout is not an error: the returned [`Command`] carries
    /// `error` set and no `children`. Only validation failure, append
    /// failure, or cancellation return `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Validation`], [`CommandError::AppendFailed`],
    /// or [`CommandError::Cancelled`].
    #[tracing::instrument(skip(self, params, cancellation), fields(action = %params.action))]
    pub async fn create_command_sync(
        &self,
        params: CommandParams,
        deadline_override: Option<Duration>,
        cancellation: CancellationToken,
    ) -> Result<Command, CommandError> {
        self.validator
            .validate(&params)
            .map_err(CommandError::Validation)?;

        let id = new_id();
        let timeout = deadline_override.unwrap_or(self.sync_timeout);
        let deadline = Instant::now() + timeout;

        // Register before append: an event racing the append's own ack
        // must still be observed.
        let waiter = self.hub.register_waiter(id);

        let append = self.producer.append(OutboundRecord::new(
            self.commands_topic.clone(),
            id,
            LogValue::command(params.action.clone(), params.data.clone()),
        ));

        let ack = tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                self.hub.unregister_waiter(&id);
                return Err(CommandError::Cancelled);
            }
            result = append => match result {
                Ok(ack) => ack,
                Err(err) => {
                    self.hub.unregister_waiter(&id);
                    return Err(CommandError::AppendFailed(err));
                }
            },
        };

        tracing::debug!(command_id = %id, topic = %ack.topic, partition = ack.partition, offset = ack.offset, "command appended, awaiting completion");

        let mut command = Command::new(
            id,
            params.action,
            params.data,
            ack.timestamp,
            ack.topic,
            ack.partition,
            ack.offset,
        );

        tokio::select! {
            biased;
            () = cancellation.cancelled() => {
                self.hub.unregister_waiter(&id);
                return Err(CommandError::Cancelled);
            }
            outcome = self.hub.wait_for_waiter(id, waiter, deadline) => {
                match outcome {
                    Some(event) => command.children = Some(vec![event.id]),
                    None => {
                        command.error = Some("Timed out waiting for completion event.".to_string());
                    }
                }
            }
        }

        Ok(command)
    }

    /// List commands ascending by log offset, delegating to the
    /// attached [`IndexReader`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on storage or deserialization failure.
    pub async fn list_commands(&self, offset: u64, limit: u64) -> Result<Page<Command>, IndexError> {
        self.index.list_commands(offset, limit).await
    }

    /// Point lookup of a command by id, delegating to the attached
    /// [`IndexReader`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on storage or deserialization failure.
    pub async fn get_command_by_id(&self, id: Uuid) -> Result<Option<Command>, IndexError> {
        self.index.get_command(id).await
    }

    /// List events ascending by log offset, delegating to the attached
    /// [`IndexReader`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on storage or deserialization failure.
    pub async fn list_events(&self, offset: u64, limit: u64) -> Result<Page<Event>, IndexError> {
        self.index.list_events(offset, limit).await
    }

    /// Point lookup of an event by id, delegating to the attached
    /// [`IndexReader`].
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on storage or deserialization failure.
    pub async fn get_event_by_id(&self, id: Uuid) -> Result<Option<Event>, IndexError> {
        self.index.get_event(id).await
    }

    /// Live-stream commands with the configured default sliding-buffer
    /// capacity (`stream-buffer-size`, default 10).
    #[must_use]
    pub fn stream_commands(&self) -> SlidingReceiver<Command> {
        self.hub.subscribe_commands(self.stream_buffer_size)
    }

    /// Live-stream commands with an explicit sliding-buffer capacity.
    #[must_use]
    pub fn stream_commands_with_capacity(&self, capacity: usize) -> SlidingReceiver<Command> {
        self.hub.subscribe_commands(capacity)
    }

    /// Live-stream events with the configured default sliding-buffer
    /// capacity. Symmetric to
    /// [`stream_commands`](Self::stream_commands).
    #[must_use]
    pub fn stream_events(&self) -> SlidingReceiver<Event> {
        self.hub.subscribe_events(self.stream_buffer_size)
    }

    /// Live-stream events with an explicit sliding-buffer capacity.
    #[must_use]
    pub fn stream_events_with_capacity(&self, capacity: usize) -> SlidingReceiver<Event> {
        self.hub.subscribe_events(capacity)
    }

    /// The topic commands are appended to.
    #[must_use]
    pub fn commands_topic(&self) -> &str {
        &self.commands_topic
    }

    /// The topic events are appended to.
    #[must_use]
    pub fn events_topic(&self) -> &str {
        &self.events_topic
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use cqrsbus_testing::InMemoryBroker;

    fn test_config() -> Config {
        Config {
            commands_topic: "commands".to_string(),
            events_topic: "events".to_string(),
            sync_timeout: Duration::from_secs(5),
            stream_buffer_size: 10,
        }
    }

    fn commander_with_broker() -> (Commander, Arc<InMemoryBroker>) {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = broker.producer();
        let consumer = broker.consumer(vec!["commands".to_string(), "events".to_string()]);
        let index = broker.index_reader("commands", "events");
        let hub = FanoutHub::spawn(Arc::new(consumer), "commands", "events");
        let commander = Commander::new(hub, Arc::new(producer), Arc::new(index), &test_config());
        (commander, broker)
    }

    #[tokio::test]
    async fn async_create_returns_appended_command() {
        let (commander, _broker) = commander_with_broker();
        let command = commander
            .create_command(CommandParams::new("ship".to_string(), serde_json::json!({"sku": "x"})))
            .await
            .expect("create should succeed");

        assert_eq!(command.action, "ship");
        assert!(command.children.is_none());
        assert!(command.error.is_none());
        assert!(command.offset >= 0);
    }

    #[tokio::test]
    async fn sync_create_resolves_with_children_when_event_arrives() {
        let (commander, broker) = commander_with_broker();
        let producer = broker.producer();

        let command_future = commander.create_command_sync(
            CommandParams::new("ship".to_string(), serde_json::json!({})),
            Some(Duration::from_secs(5)),
            CancellationToken::new(),
        );
        tokio::pin!(command_future);

        // Poll once so the waiter is registered before we produce the event.
        let produced = tokio::select! {
            biased;
            () = tokio::task::yield_now() => true,
            _ = &mut command_future => false,
        };
        assert!(produced, "create should still be pending after one yield");

        // The command id is time-ordered but unknown to the test ahead of
        // time, so fetch it back from the append the commander just made.
        let commands = commander.list_commands(0, 0).await.expect("list should succeed");
        let id = commands.items.last().expect("command should be indexed").id;

        producer
            .append(OutboundRecord::new(
                "events".to_string(),
                Uuid::now_v7(),
                LogValue::event("shipped".to_string(), serde_json::json!({}), id),
            ))
            .await
            .expect("event append should succeed");

        let command = command_future.await.expect("create should succeed");
        assert_eq!(command.children.as_ref().map(Vec::len), Some(1));
        assert!(command.error.is_none());
    }

    #[tokio::test]
    async fn sync_create_times_out_without_event() {
        let (commander, _broker) = commander_with_broker();

        let command = commander
            .create_command_sync(
                CommandParams::new("ship".to_string(), serde_json::json!({})),
                Some(Duration::from_millis(30)),
                CancellationToken::new(),
            )
            .await
            .expect("create should succeed even on timeout");

        assert!(command.children.is_none());
        assert_eq!(
            command.error.as_deref(),
            Some("Timed out waiting for completion event.")
        );
    }

    #[tokio::test]
    async fn sync_create_honors_cancellation() {
        let (commander, _broker) = commander_with_broker();
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = commander
            .create_command_sync(
                CommandParams::new("ship".to_string(), serde_json::json!({})),
                Some(Duration::from_secs(5)),
                cancellation,
            )
            .await;

        assert!(matches!(result, Err(CommandError::Cancelled)));
    }
}
