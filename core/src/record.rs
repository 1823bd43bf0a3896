//! Broker-shaped record types.
//!
//! [`LogRecord`] is what a [`crate::log::LogConsumer`] delivers and
//! [`AppendAck`] is what a [`crate::log::LogProducer`] returns. Both are
//! intentionally broker-agnostic: they carry a topic, a key, an opaque
//! value, and the position assigned by the broker, without referencing
//! any particular wire protocol.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The payload carried by a [`LogRecord`], distinguishing a command from
/// an event by the presence of `parent`.
///
/// Serialized as JSON on the wire: unlike the aggregate-replay event
/// encoding this workspace's sibling crates use (`bincode`, tuned for a
/// closed set of known event types), command/event `data` here is an
/// arbitrary caller-supplied payload, so a self-describing, inspectable
/// encoding is the better fit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogValue {
    /// The action name (e.g. `"ship"`, `"shipped"`).
    pub action: String,
    /// The opaque, caller-supplied payload.
    pub data: serde_json::Value,
    /// For events: the id of the command or event that triggered this
    /// one. `None` for commands.
    pub parent: Option<Uuid>,
}

impl LogValue {
    /// Build the value for a command record (no `parent`).
    #[must_use]
    pub const fn command(action: String, data: serde_json::Value) -> Self {
        Self {
            action,
            data,
            parent: None,
        }
    }

    /// Build the value for an event record.
    #[must_use]
    pub const fn event(action: String, data: serde_json::Value, parent: Uuid) -> Self {
        Self {
            action,
            data,
            parent: Some(parent),
        }
    }
}

/// A record as delivered by a [`crate::log::LogConsumer`], already
/// positioned by the broker.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    /// The topic this record was read from.
    pub topic: String,
    /// The record's key — the entity's id.
    pub key: Uuid,
    /// The record's value.
    pub value: LogValue,
    /// The broker partition this record belongs to.
    pub partition: i32,
    /// The broker offset within `partition`.
    pub offset: i64,
    /// Broker-assigned ingestion timestamp, epoch milliseconds.
    pub timestamp: i64,
}

/// The unpositioned record a [`crate::log::LogProducer`] is asked to
/// append. The broker assigns `partition`/`offset`/`timestamp` and
/// returns them in an [`AppendAck`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundRecord {
    /// The topic to append to.
    pub topic: String,
    /// The record's key — the entity's id.
    pub key: Uuid,
    /// The record's value.
    pub value: LogValue,
}

impl OutboundRecord {
    /// Construct an outbound record.
    #[must_use]
    pub const fn new(topic: String, key: Uuid, value: LogValue) -> Self {
        Self { topic, key, value }
    }
}

/// Append-acknowledgement returned by [`crate::log::LogProducer::append`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppendAck {
    /// The topic the record was appended to.
    pub topic: String,
    /// The broker partition the record landed in.
    pub partition: i32,
    /// The offset the broker assigned this record within its partition.
    pub offset: i64,
    /// Broker-assigned ingestion timestamp, epoch milliseconds.
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_value_has_no_parent() {
        let value = LogValue::command("ship".to_string(), serde_json::json!({"sku": "x"}));
        assert!(value.parent.is_none());
        assert_eq!(value.action, "ship");
    }

    #[test]
    fn event_value_carries_parent() {
        let parent = Uuid::now_v7();
        let value = LogValue::event("shipped".to_string(), serde_json::json!({}), parent);
        assert_eq!(value.parent, Some(parent));
    }
}
