//! The [`Command`] domain type and its caller-facing input, [`CommandParams`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::LogRecord;

/// Caller-supplied parameters for submitting a command.
///
/// The API, not the caller, assigns the resulting [`Command::id`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandParams {
    /// The action this command requests.
    pub action: String,
    /// Opaque, caller-supplied payload.
    pub data: serde_json::Value,
}

impl CommandParams {
    /// Build a new set of command parameters.
    #[must_use]
    pub const fn new(action: String, data: serde_json::Value) -> Self {
        Self { action, data }
    }
}

/// A durable, keyed record requesting an action — a log entry on the
/// commands topic, enriched with the broker position it was appended at
/// and (for a synchronous submission) its eventual outcome.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    /// Time-ordered id, generated by the API (see [`crate::id::new_id`]).
    pub id: Uuid,
    /// The action this command requests.
    pub action: String,
    /// Opaque, caller-supplied payload.
    pub data: serde_json::Value,
    /// Broker-assigned ingestion timestamp, epoch milliseconds.
    pub timestamp: i64,
    /// The commands topic this was appended to.
    pub topic: String,
    /// The broker partition this command landed in.
    pub partition: i32,
    /// The broker offset this command was assigned.
    pub offset: i64,
    /// Ids of completion events observed for this command, if a
    /// synchronous submission was satisfied before its deadline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Uuid>>,
    /// Set when a synchronous submission timed out waiting for a
    /// completion event. The command was still successfully recorded;
    /// this is a business outcome, not an append failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Command {
    /// Build the base command (pre-correlation) from generated id, caller
    /// params, and the append-ack's position.
    #[must_use]
    pub const fn new(
        id: Uuid,
        params_action: String,
        params_data: serde_json::Value,
        timestamp: i64,
        topic: String,
        partition: i32,
        offset: i64,
    ) -> Self {
        Self {
            id,
            action: params_action,
            data: params_data,
            timestamp,
            topic,
            partition,
            offset,
            children: None,
            error: None,
        }
    }

    /// Project a raw commands-topic [`LogRecord`] into a [`Command`], as
    /// used by `streamCommands`'s broadcast-to-projection path.
    ///
    /// # Panics
    ///
    /// Never panics; a malformed record (e.g. one with a `parent`, which
    /// should not appear on the commands topic) is projected as-is since
    /// `Command` carries no `parent` field to lose information into.
    #[must_use]
    pub fn from_record(record: &LogRecord) -> Self {
        Self {
            id: record.key,
            action: record.value.action.clone(),
            data: record.value.data.clone(),
            timestamp: record.timestamp,
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
            children: None,
            error: None,
        }
    }
}
