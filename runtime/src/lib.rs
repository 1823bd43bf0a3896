//! # cqrsbus runtime
//!
//! The concurrency nucleus of the command/event broker: [`hub::FanoutHub`]
//! demultiplexes one consumed record stream into per-topic broadcast
//! groups and a correlation waiter index, and [`commander::Commander`]
//! is the public API built on top of it — command submission (async and
//! synchronous, correlated-by-event), paginated/point index lookups, and
//! live streaming.
//!
//! This crate depends only on `cqrsbus-core`'s traits; it is generic
//! over whatever `LogProducer`/`LogConsumer`/`IndexReader` the embedding
//! application supplies (`cqrsbus-redpanda`, `cqrsbus-postgres`, or
//! `cqrsbus-testing`'s in-memory fakes).

pub mod broadcast;
pub mod commander;
pub mod config;
pub mod hub;

pub use broadcast::{BroadcastGroup, SlidingReceiver, SlidingSender};
pub use commander::{AcceptAllValidator, Commander, CommandError, CommandValidator, ValidationErrors};
pub use config::Config;
pub use hub::FanoutHub;
