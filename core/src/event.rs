//! The [`Event`] domain type.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::LogRecord;

/// A durable, keyed record reporting an outcome — a log entry on the
/// events topic. Carries a `parent` reference to the command (or prior
/// event) that triggered it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Time-ordered id, generated upstream of this broker (by whichever
    /// executor produced the event).
    pub id: Uuid,
    /// The command or event this event reports the outcome of.
    pub parent: Uuid,
    /// The action this event reports.
    pub action: String,
    /// Opaque, caller-supplied payload.
    pub data: serde_json::Value,
    /// Broker-assigned ingestion timestamp, epoch milliseconds.
    pub timestamp: i64,
    /// The events topic this was appended to.
    pub topic: String,
    /// The broker partition this event landed in.
    pub partition: i32,
    /// The broker offset this event was assigned.
    pub offset: i64,
}

impl Event {
    /// Project a raw events-topic [`LogRecord`] into an [`Event`].
    ///
    /// # Errors
    ///
    /// Returns the record's topic/offset in an error string if it has no
    /// `parent`, since every event must correlate to a parent command or
    /// event by construction of the events-topic schema.
    pub fn from_record(record: &LogRecord) -> Result<Self, String> {
        let parent = record.value.parent.ok_or_else(|| {
            format!(
                "event record at {}:{} has no parent",
                record.topic, record.offset
            )
        })?;

        Ok(Self {
            id: record.key,
            parent,
            action: record.value.action.clone(),
            data: record.value.data.clone(),
            timestamp: record.timestamp,
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogValue;

    #[test]
    fn from_record_requires_parent() {
        let record = LogRecord {
            topic: "events".to_string(),
            key: Uuid::now_v7(),
            value: LogValue::command("shipped".to_string(), serde_json::json!({})),
            partition: 0,
            offset: 1,
            timestamp: 0,
        };

        assert!(Event::from_record(&record).is_err());
    }

    #[test]
    #[allow(clippy::expect_used)]
    fn from_record_projects_parent() {
        let parent = Uuid::now_v7();
        let record = LogRecord {
            topic: "events".to_string(),
            key: Uuid::now_v7(),
            value: LogValue::event("shipped".to_string(), serde_json::json!({}), parent),
            partition: 0,
            offset: 7,
            timestamp: 123,
        };

        let event = Event::from_record(&record).expect("has parent");
        assert_eq!(event.parent, parent);
        assert_eq!(event.offset, 7);
    }
}
