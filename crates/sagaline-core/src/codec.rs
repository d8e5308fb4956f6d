//! Envelope codec.
//!
//! Serializes command and ack envelopes to JSON records and stamps/extracts
//! the header contract shared by every topic. The codec is pure and
//! stateless; decoding fails with `MalformedEnvelope` when required fields
//! are missing.

use chrono::{DateTime, Utc};

use crate::broker::{Headers, Record};
use crate::envelope::{Ack, Command, Operation};
use crate::error::StepError;

/// Client-correlation identifier. Required on commands and acks.
pub const HEADER_TRACE_ID: &str = "trace_id";
/// Effect-dedup key. Required on commands.
pub const HEADER_IDEMPOTENCY_KEY: &str = "idempotency_key";
/// Operation name.
pub const HEADER_OPERATION: &str = "operation";
/// Resource name.
pub const HEADER_RESOURCE: &str = "resource";
/// Redelivery attempt, integer ≥ 0.
pub const HEADER_ATTEMPT: &str = "attempt";
/// Replay target. Required on DLQ records.
pub const HEADER_ORIGINAL_TOPIC: &str = "original_topic";
/// Classified failure reason on retry/DLQ hops.
pub const HEADER_ERROR: &str = "error";

/// Encodes a command for `topic`, stamping the header contract and keying by
/// the command's partition key.
#[must_use]
pub fn encode_command(command: &Command, topic: &str) -> Record {
    let mut headers = Headers::new();
    headers.set(HEADER_TRACE_ID, command.trace_id.as_str());
    headers.set(HEADER_IDEMPOTENCY_KEY, command.idempotency_key.as_str());
    headers.set(HEADER_OPERATION, command.operation.as_str());
    headers.set(HEADER_RESOURCE, command.resource.as_str());
    headers.set(HEADER_ATTEMPT, command.attempt.to_string());

    let payload = serde_json::to_vec(command).unwrap_or_default();
    Record::new(
        topic,
        Some(command.partition_key()),
        payload,
        headers,
        command.timestamp,
    )
}

/// Decodes a command record.
///
/// The `attempt` header is authoritative when present (retry hops rewrite the
/// header without touching the body); the body value is the fallback.
///
/// # Errors
///
/// Returns [`StepError::MalformedEnvelope`] when the body is not valid JSON
/// for the envelope or a required identity field is empty.
pub fn decode_command(record: &Record) -> Result<Command, StepError> {
    let mut command: Command = serde_json::from_slice(&record.payload)
        .map_err(|e| StepError::MalformedEnvelope(format!("command body: {e}")))?;

    if command.trace_id.trim().is_empty() {
        return Err(StepError::MalformedEnvelope("empty trace_id".into()));
    }
    if command.idempotency_key.trim().is_empty() {
        return Err(StepError::MalformedEnvelope("empty idempotency_key".into()));
    }

    if let Some(attempt) = record.headers.get_str(HEADER_ATTEMPT) {
        command.attempt = attempt
            .parse()
            .map_err(|_| StepError::MalformedEnvelope(format!("bad attempt header: {attempt}")))?;
    }
    if let Some(op) = record.headers.get_str(HEADER_OPERATION) {
        if Operation::parse(op).is_none() {
            return Err(StepError::MalformedEnvelope(format!(
                "unknown operation header: {op}"
            )));
        }
    }

    Ok(command)
}

/// Encodes an ack for `topic`, keyed identically to the inbound record.
#[must_use]
pub fn encode_ack(ack: &Ack, topic: &str, key: Option<String>) -> Record {
    let mut headers = Headers::new();
    headers.set(HEADER_TRACE_ID, ack.trace_id.as_str());

    let payload = serde_json::to_vec(ack).unwrap_or_default();
    Record::new(topic, key, payload, headers, ack.timestamp)
}

/// Decodes an ack record.
///
/// # Errors
///
/// Returns [`StepError::MalformedEnvelope`] for invalid bodies or an empty
/// `trace_id`.
pub fn decode_ack(record: &Record) -> Result<Ack, StepError> {
    let ack: Ack = serde_json::from_slice(&record.payload)
        .map_err(|e| StepError::MalformedEnvelope(format!("ack body: {e}")))?;
    if ack.trace_id.trim().is_empty() {
        return Err(StepError::MalformedEnvelope("empty trace_id".into()));
    }
    Ok(ack)
}

/// Reads the attempt header from a record, defaulting to 0.
#[must_use]
pub fn record_attempt(record: &Record) -> u32 {
    record
        .headers
        .get_str(HEADER_ATTEMPT)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// Builds the next hop for a failed record: same key and value, headers
/// carried over with `attempt`, `error`, and `original_topic` rewritten.
/// `original_topic` is set once (to `source_topic`) and never overwritten on
/// later hops.
#[must_use]
pub fn failure_hop(
    record: &Record,
    destination: &str,
    attempt: u32,
    error_code: &str,
    error_detail: &str,
    source_topic: &str,
    now: DateTime<Utc>,
) -> Record {
    let mut headers = record.headers.clone();
    headers.set(HEADER_ATTEMPT, attempt.to_string());
    headers.set(HEADER_ERROR, format!("{error_code}: {error_detail}"));
    if headers.get(HEADER_ORIGINAL_TOPIC).is_none() {
        headers.set(HEADER_ORIGINAL_TOPIC, source_topic);
    }

    Record::new(
        destination,
        record.key.clone(),
        record.payload.clone(),
        headers,
        now,
    )
}
