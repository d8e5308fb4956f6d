//! In-memory broker implementing the production broker traits.
//!
//! Topics are append-only logs; each (group, topic) pair holds a fetch
//! cursor and a committed watermark, so tests can assert the
//! produce-before-commit ordering the pipeline guarantees.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use sagaline_core::broker::{BrokerError, Record, RecordConsumer, RecordPublisher};

#[derive(Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Record>>,
    cursors: HashMap<(String, String), usize>,
    committed: HashMap<(String, String), usize>,
}

/// Shared in-memory broker. Cloning shares the underlying topic logs.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a consumer-group member subscribed to `topics`.
    #[must_use]
    pub fn consumer(&self, group: &str, topics: &[&str]) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            group: group.to_string(),
            topics: topics.iter().map(|t| (*t).to_string()).collect(),
        }
    }

    /// Snapshot of all records ever published to `topic`.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<Record> {
        self.state
            .lock()
            .unwrap()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of offsets `group` has committed on `topic`.
    #[must_use]
    pub fn committed(&self, group: &str, topic: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordPublisher for InMemoryBroker {
    async fn publish(&self, mut record: Record) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock().unwrap();
            let log = state.topics.entry(record.topic.clone()).or_default();
            record.partition = 0;
            record.offset = log.len() as i64;
            log.push(record);
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

/// One member of an in-memory consumer group.
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group: String,
    topics: Vec<String>,
}

impl InMemoryConsumer {
    fn try_fetch(&self) -> Option<Record> {
        let mut state = self.broker.state.lock().unwrap();
        for topic in &self.topics {
            let len = state.topics.get(topic).map_or(0, Vec::len);
            let cursor_key = (self.group.clone(), topic.clone());
            let cursor = state.cursors.get(&cursor_key).copied().unwrap_or(0);
            if cursor < len {
                let record = state.topics[topic][cursor].clone();
                state.cursors.insert(cursor_key, cursor + 1);
                return Some(record);
            }
        }
        None
    }
}

#[async_trait]
impl RecordConsumer for InMemoryConsumer {
    async fn next(&mut self) -> Result<Record, BrokerError> {
        loop {
            let mut notified = std::pin::pin!(self.broker.notify.notified());
            // Register before checking so a publish between the check and the
            // await is not lost.
            notified.as_mut().enable();
            if let Some(record) = self.try_fetch() {
                return Ok(record);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, record: &Record) -> Result<(), BrokerError> {
        let mut state = self.broker.state.lock().unwrap();
        let key = (self.group.clone(), record.topic.clone());
        let watermark = usize::try_from(record.offset + 1)
            .map_err(|_| BrokerError::Consume("negative offset".into()))?;
        let entry = state.committed.entry(key).or_insert(0);
        if watermark > *entry {
            *entry = watermark;
        }
        Ok(())
    }
}

/// Publisher wrapper that fails the first `fail_times` publishes, then
/// delegates. Exercises the producer-failure path.
pub struct FlakyPublisher<P> {
    inner: P,
    remaining: AtomicU32,
}

impl<P> FlakyPublisher<P> {
    /// Wraps `inner`, failing the first `fail_times` publishes.
    #[must_use]
    pub fn new(inner: P, fail_times: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(fail_times),
        }
    }
}

#[async_trait]
impl<P: RecordPublisher> RecordPublisher for FlakyPublisher<P> {
    async fn publish(&self, record: Record) -> Result<(), BrokerError> {
        let remaining = self.remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(BrokerError::Publish {
                topic: record.topic,
                reason: "injected producer failure".into(),
            });
        }
        self.inner.publish(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sagaline_core::broker::Headers;

    fn record(topic: &str, payload: &str) -> Record {
        Record::new(topic, None, payload.as_bytes().to_vec(), Headers::new(), Utc::now())
    }

    #[tokio::test]
    async fn test_consumer_sees_published_records_in_order() {
        let broker = InMemoryBroker::new();
        broker.publish(record("t", "a")).await.unwrap();
        broker.publish(record("t", "b")).await.unwrap();

        let mut consumer = broker.consumer("g", &["t"]);
        assert_eq!(consumer.next().await.unwrap().payload, b"a");
        assert_eq!(consumer.next().await.unwrap().payload, b"b");
    }

    #[tokio::test]
    async fn test_groups_have_independent_cursors() {
        let broker = InMemoryBroker::new();
        broker.publish(record("t", "a")).await.unwrap();

        let mut one = broker.consumer("g1", &["t"]);
        let mut two = broker.consumer("g2", &["t"]);
        assert_eq!(one.next().await.unwrap().payload, b"a");
        assert_eq!(two.next().await.unwrap().payload, b"a");
    }

    #[tokio::test]
    async fn test_commit_tracks_watermark() {
        let broker = InMemoryBroker::new();
        broker.publish(record("t", "a")).await.unwrap();

        let mut consumer = broker.consumer("g", &["t"]);
        let fetched = consumer.next().await.unwrap();
        assert_eq!(broker.committed("g", "t"), 0);
        consumer.commit(&fetched).await.unwrap();
        assert_eq!(broker.committed("g", "t"), 1);
    }

    #[tokio::test]
    async fn test_next_wakes_on_late_publish() {
        let broker = InMemoryBroker::new();
        let mut consumer = broker.consumer("g", &["t"]);

        let publisher = broker.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            publisher.publish(record("t", "late")).await.unwrap();
        });

        let fetched = consumer.next().await.unwrap();
        assert_eq!(fetched.payload, b"late");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_flaky_publisher_recovers() {
        let broker = InMemoryBroker::new();
        let flaky = FlakyPublisher::new(broker.clone(), 2);

        assert!(flaky.publish(record("t", "x")).await.is_err());
        assert!(flaky.publish(record("t", "x")).await.is_err());
        assert!(flaky.publish(record("t", "x")).await.is_ok());
        assert_eq!(broker.records("t").len(), 1);
    }
}
