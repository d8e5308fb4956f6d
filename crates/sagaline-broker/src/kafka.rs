//! Kafka adapter.
//!
//! One idempotent producer per replica (`acks=all`,
//! `enable.idempotence=true`, one in-flight request so ordering holds) and a
//! manually-committed stream consumer per group member.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};

use sagaline_core::broker::{BrokerError, Headers, Record, RecordConsumer, RecordPublisher};

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Thread-safe idempotent producer shared within a replica.
pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    /// Connects an idempotent producer to `endpoints`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Publish`] when the client cannot be created.
    pub fn connect(endpoints: &[String]) -> Result<Self, BrokerError> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", endpoints.join(","))
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "1")
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| BrokerError::Publish {
                topic: String::new(),
                reason: format!("producer create: {e}"),
            })?;
        Ok(Self { producer })
    }
}

fn owned_headers(headers: &Headers) -> OwnedHeaders {
    let mut owned = OwnedHeaders::new();
    for (key, value) in headers.iter() {
        owned = owned.insert(Header {
            key,
            value: Some(value),
        });
    }
    owned
}

#[async_trait]
impl RecordPublisher for KafkaPublisher {
    async fn publish(&self, record: Record) -> Result<(), BrokerError> {
        let mut outbound: FutureRecord<'_, String, Vec<u8>> = FutureRecord::to(&record.topic)
            .payload(&record.payload)
            .headers(owned_headers(&record.headers))
            .timestamp(record.timestamp.timestamp_millis());
        if let Some(key) = record.key.as_ref() {
            outbound = outbound.key(key);
        }

        self.producer
            .send(outbound, Timeout::After(PRODUCE_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(e, _)| BrokerError::Publish {
                topic: record.topic.clone(),
                reason: e.to_string(),
            })
    }
}

/// One consumer-group member over a topic subscription. Offsets are
/// committed explicitly, never on fetch.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// Joins `group` and subscribes to `topics`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Consume`] when the client cannot be created or
    /// the subscription fails.
    pub fn subscribe(
        endpoints: &[String],
        group: &str,
        topics: &[&str],
    ) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", endpoints.join(","))
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| BrokerError::Consume(format!("consumer create: {e}")))?;
        consumer
            .subscribe(topics)
            .map_err(|e| BrokerError::Consume(format!("subscribe: {e}")))?;
        Ok(Self { consumer })
    }
}

#[async_trait]
impl RecordConsumer for KafkaConsumer {
    async fn next(&mut self) -> Result<Record, BrokerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        let mut headers = Headers::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                if let Some(value) = header.value {
                    headers.set(header.key, value);
                }
            }
        }

        let timestamp = message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Ok(Record {
            topic: message.topic().to_string(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
            timestamp,
            partition: message.partition(),
            offset: message.offset(),
        })
    }

    async fn commit(&mut self, record: &Record) -> Result<(), BrokerError> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &record.topic,
                record.partition,
                Offset::Offset(record.offset + 1),
            )
            .map_err(|e| BrokerError::Consume(e.to_string()))?;
        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(|e| BrokerError::Consume(e.to_string()))
    }
}
