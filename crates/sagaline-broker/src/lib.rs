//! Sagaline Broker — Kafka implementations of the core broker traits.

mod kafka;

pub use kafka::{KafkaConsumer, KafkaPublisher};
