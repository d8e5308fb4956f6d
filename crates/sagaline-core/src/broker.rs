//! Broker abstraction.
//!
//! The pipeline talks to the log broker through these traits; the Kafka
//! adapter and the in-memory test broker both implement them. Records carry
//! headers and a timestamp so retry hops can preserve context and the
//! re-queuer can measure stage delays from production time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Ordered set of record headers. Setting a key replaces any prior value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(Vec<(String, Vec<u8>)>);

impl Headers {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw value for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Returns the value for `key` as UTF-8, if present and valid.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Sets `key` to `value`, replacing any existing entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// One record on a topic.
#[derive(Debug, Clone)]
pub struct Record {
    /// Destination (or source) topic.
    pub topic: String,
    /// Partition key; preserved verbatim across every hop.
    pub key: Option<String>,
    /// Serialized envelope.
    pub payload: Vec<u8>,
    /// Record headers.
    pub headers: Headers,
    /// Production timestamp.
    pub timestamp: DateTime<Utc>,
    /// Partition the record was read from (0 for outbound records).
    pub partition: i32,
    /// Offset within the partition (0 for outbound records).
    pub offset: i64,
}

impl Record {
    /// Builds an outbound record.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        key: Option<String>,
        payload: Vec<u8>,
        headers: Headers,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload,
            headers,
            timestamp,
            partition: 0,
            offset: 0,
        }
    }
}

/// Broker-level failure.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A produce did not complete.
    #[error("publish to {topic} failed: {reason}")]
    Publish {
        /// Destination topic.
        topic: String,
        /// Broker-reported reason.
        reason: String,
    },

    /// A fetch or offset commit failed.
    #[error("consume failed: {0}")]
    Consume(String),
}

/// Thread-safe producer shared within a replica.
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    /// Publishes one record, returning once the broker acknowledged it.
    async fn publish(&self, record: Record) -> Result<(), BrokerError>;
}

/// One consumer-group member. Offsets advance only on [`commit`].
///
/// [`commit`]: RecordConsumer::commit
#[async_trait]
pub trait RecordConsumer: Send {
    /// Waits for and returns the next record from the subscription.
    async fn next(&mut self) -> Result<Record, BrokerError>;

    /// Commits the offset of `record`, marking it consumed for this group.
    async fn commit(&mut self, record: &Record) -> Result<(), BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_set_replaces_existing_value() {
        let mut headers = Headers::new();
        headers.set("attempt", "0");
        headers.set("attempt", "1");
        assert_eq!(headers.get_str("attempt"), Some("1"));
        assert_eq!(headers.iter().count(), 1);
    }

    #[test]
    fn test_headers_get_missing_is_none() {
        let headers = Headers::new();
        assert!(headers.get("trace_id").is_none());
        assert!(headers.get_str("trace_id").is_none());
    }

    #[test]
    fn test_headers_preserve_insertion_order() {
        let mut headers = Headers::new();
        headers.set("a", "1");
        headers.set("b", "2");
        let keys: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
