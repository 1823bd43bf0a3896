//! The [`IndexReader`] adapter contract: random-access read-side lookup
//! of commands and events by a separate, out-of-band index.
//!
//! The core never writes to this index — it is populated by an external
//! indexer process (see spec §4.6) that consumes the same two logs this
//! crate's [`crate::log`] traits describe. `IndexReader` only reads.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::command::Command;
use crate::event::Event;

/// Errors an [`IndexReader`] can surface.
#[derive(Error, Debug, Clone)]
pub enum IndexError {
    /// The underlying storage failed (connection, query, timeout).
    #[error("index storage error: {0}")]
    Storage(String),

    /// A stored row could not be deserialized back into the domain type.
    #[error("index deserialization error: {0}")]
    Deserialization(String),
}

/// A page of results from [`IndexReader::list_commands`] or
/// [`IndexReader::list_events`].
///
/// `items` is ordered ascending by log offset within the commands/events
/// table respectively. `limit == 0` on the request means "all from
/// offset"; the `limit` echoed back here is the limit that was requested,
/// not necessarily `items.len()`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    /// The rows in this page, offset-ascending.
    pub items: Vec<T>,
    /// The requested starting offset.
    pub offset: u64,
    /// The requested limit (`0` meaning unbounded).
    pub limit: u64,
    /// The total row count available at `offset == 0`, regardless of
    /// this page's `limit`.
    pub total: u64,
}

/// Adapter contract for the read-side index: paginated listing and point
/// lookup of commands and events by id.
pub trait IndexReader: Send + Sync {
    /// List commands ascending by log offset, starting at `offset`.
    /// `limit == 0` means "all from offset".
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on storage or deserialization failure.
    fn list_commands(
        &self,
        offset: u64,
        limit: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Page<Command>, IndexError>> + Send + '_>>;

    /// Point lookup of a command by id. Returns `Ok(None)` — never an
    /// error — when no such command exists.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on storage or deserialization failure.
    fn get_command(
        &self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Command>, IndexError>> + Send + '_>>;

    /// List events ascending by log offset, starting at `offset`.
    /// `limit == 0` means "all from offset".
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on storage or deserialization failure.
    fn list_events(
        &self,
        offset: u64,
        limit: u64,
    ) -> Pin<Box<dyn Future<Output = Result<Page<Event>, IndexError>> + Send + '_>>;

    /// Point lookup of an event by id. Returns `Ok(None)` — never an
    /// error — when no such event exists.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on storage or deserialization failure.
    fn get_event(
        &self,
        id: Uuid,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Event>, IndexError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_carries_requested_limit_not_item_count() {
        let page = Page {
            items: vec![1, 2, 3],
            offset: 0,
            limit: 100,
            total: 3,
        };
        assert_eq!(page.limit, 100);
        assert_eq!(page.items.len(), 3);
    }
}
