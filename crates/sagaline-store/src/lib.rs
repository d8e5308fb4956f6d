//! Sagaline Store — transactional persistence for the step processor.
//!
//! All operations take a caller-supplied connection so one step's domain
//! effect, idempotency record, and saga-log row commit (or roll back)
//! atomically. The step processor is the only writer.

pub mod error;
pub mod idempotency;
pub mod messages;
pub mod saga_log;

pub use error::StoreError;
