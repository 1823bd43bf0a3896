//! Adapter traits for the two ordered logs the broker core consumes:
//! [`LogProducer`] appends, [`LogConsumer`] delivers.
//!
//! # Dyn Compatibility
//!
//! Both traits return explicit `Pin<Box<dyn Future>>` instead of using
//! `async fn`, so they can be used as trait objects (`Arc<dyn
//! LogProducer>`). `FanoutHub` and `Commander` hold their adapters this
//! way so the broker/runtime pair (Redpanda, or the in-memory testing
//! fakes) can be swapped without generic parameters leaking through the
//! public API.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::record::{AppendAck, LogRecord, OutboundRecord};

/// Errors a [`LogProducer`] can surface.
#[derive(Error, Debug, Clone)]
pub enum ProducerError {
    /// Transport-level failure (connection reset, DNS, etc).
    #[error("transport error appending to '{topic}': {reason}")]
    Transport {
        /// The topic being appended to.
        topic: String,
        /// The underlying transport failure.
        reason: String,
    },

    /// The broker rejected the append (e.g. unknown topic, auth failure).
    #[error("broker rejected append to '{topic}': {reason}")]
    BrokerRejected {
        /// The topic being appended to.
        topic: String,
        /// The broker's rejection reason.
        reason: String,
    },

    /// The adapter's local send queue is full and could not accept the
    /// append before its own internal backpressure limit.
    #[error("local queue overflow appending to '{0}'")]
    QueueOverflow(String),

    /// The adapter's response channel was dropped or never fulfilled.
    /// Per spec, a closed/never-fulfilled result is treated as this
    /// failure rather than hanging the caller forever.
    #[error("send response channel closed for '{0}'")]
    ResponseChannelClosed(String),
}

/// Adapter contract for appending a keyed record to the broker and
/// receiving its append-acknowledgement.
///
/// The result signals exactly once: either the ack or a failure.
pub trait LogProducer: Send + Sync {
    /// Append `record` to the broker, returning its append-acknowledgement
    /// once the broker has durably accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError`] on transport failure, broker rejection,
    /// local queue overflow, or a response channel that closed without
    /// ever resolving.
    fn append(
        &self,
        record: OutboundRecord,
    ) -> Pin<Box<dyn Future<Output = Result<AppendAck, ProducerError>> + Send + '_>>;
}

/// Errors a [`LogConsumer`] can surface on its delivered stream.
#[derive(Error, Debug, Clone)]
pub enum ConsumerError {
    /// Transport-level failure while polling the broker; the consumer may
    /// still recover and keep delivering.
    #[error("transport error consuming '{topic}': {reason}")]
    Transport {
        /// The topic being consumed.
        topic: String,
        /// The underlying transport failure.
        reason: String,
    },

    /// The consumer hit an unrecoverable condition and will deliver no
    /// further records; whoever owns the sink should treat this as
    /// terminal and tear down (see `FanoutHub::shutdown`).
    #[error("consumer fatal: {0}")]
    Fatal(String),
}

/// The channel a [`LogConsumer`] delivers records onto. Owned by the
/// caller (in this workspace, `FanoutHub`'s demux task); the consumer
/// only ever sends.
pub type LogRecordSink = mpsc::Sender<Result<LogRecord, ConsumerError>>;

/// A join handle over a spawned [`LogConsumer::drain`] task, returned so
/// callers can detect the consumer task's own completion (as distinct
/// from records it forwards).
pub type LogConsumerHandle = tokio::task::JoinHandle<Result<(), ConsumerError>>;

/// Adapter contract for subscribing to a fixed set of topics and
/// delivering a lazy, ordered sequence of records onto `sink`.
///
/// Delivery is at-least-once; duplicates are tolerated by downstream
/// consumers (broadcast subscribers are idempotent consumers of streams;
/// correlation waiters are satisfied by the first matching record and
/// ignore duplicates because they are unregistered immediately after).
pub trait LogConsumer: Send + Sync {
    /// Start delivering records from the subscribed topics onto `sink` in
    /// broker order per partition. Returns once the underlying broker
    /// connection ends (normally only on fatal error — callers typically
    /// `tokio::spawn` this and hold the sink open for the consumer's
    /// lifetime).
    ///
    /// # Errors
    ///
    /// The returned future resolves to `Err` only if the consumer loop
    /// itself cannot continue (see [`ConsumerError::Fatal`]); per-record
    /// errors are sent on `sink` instead of terminating the loop.
    fn drain(
        &self,
        sink: LogRecordSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), ConsumerError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_error_messages_name_the_topic() {
        let err = ProducerError::Transport {
            topic: "commands".to_string(),
            reason: "connection reset".to_string(),
        };
        assert!(format!("{err}").contains("commands"));
    }

    #[test]
    fn consumer_fatal_error_message() {
        let err = ConsumerError::Fatal("broker gone".to_string());
        assert!(format!("{err}").contains("broker gone"));
    }
}
