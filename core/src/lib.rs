//! # cqrsbus core
//!
//! Domain types and adapter traits for a CQRS-style command/event broker.
//!
//! This crate has no I/O of its own. It defines:
//!
//! - The wire-shaped data model ([`command`], [`event`], [`record`]) that
//!   flows between the broker and the rest of the system.
//! - The time-ordered identifier scheme ([`id`]) used for command and
//!   event ids.
//! - The adapter traits a broker client must satisfy: [`log::LogProducer`],
//!   [`log::LogConsumer`], and [`index::IndexReader`].
//!
//! Concrete implementations live in sibling crates:
//!
//! - `cqrsbus-redpanda` implements `LogProducer`/`LogConsumer` over
//!   `rdkafka`.
//! - `cqrsbus-postgres` implements `IndexReader` over `sqlx`/Postgres.
//! - `cqrsbus-testing` implements all three traits in memory, for tests.
//!
//! The concurrency nucleus that consumes these traits — `FanoutHub` and
//! `Commander` — lives in the `cqrsbus-runtime` crate, which depends on
//! this one.

pub mod command;
pub mod event;
pub mod id;
pub mod index;
pub mod log;
pub mod record;

pub use command::{Command, CommandParams};
pub use event::Event;
pub use id::new_id;
pub use index::{IndexError, IndexReader, Page};
pub use log::{
    ConsumerError, LogConsumer, LogConsumerHandle, LogProducer, LogRecordSink, ProducerError,
};
pub use record::{AppendAck, LogRecord, LogValue, OutboundRecord};
