//! Command and ack envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The CRUD operation a command instructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Insert a new message.
    Create,
    /// Fetch a message by id.
    Read,
    /// Replace the content of an existing message.
    Update,
    /// Remove a message by id.
    Delete,
}

impl Operation {
    /// Wire name of the operation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Read => "Read",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }

    /// Parses the wire name back into an operation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Create" => Some(Self::Create),
            "Read" => Some(Self::Read),
            "Update" => Some(Self::Update),
            "Delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Saga step name recorded in the audit log.
    #[must_use]
    pub fn step_name(self) -> &'static str {
        match self {
            Self::Create => "CreateMessage",
            Self::Read => "ReadMessage",
            Self::Update => "UpdateMessage",
            Self::Delete => "DeleteMessage",
        }
    }

    /// Event name emitted on a successful ack.
    #[must_use]
    pub fn event_name(self) -> &'static str {
        match self {
            Self::Create => "MessageCreated",
            Self::Read => "MessageRead",
            Self::Update => "MessageUpdated",
            Self::Delete => "MessageDeleted",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried by a command. `id` is absent for `Create`; `content` is
/// absent for `Read` and `Delete`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandPayload {
    /// Target message id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Message content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Envelope instructing one saga step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Opaque unique identifier for client correlation.
    pub trace_id: String,
    /// Correlation identifier linking related commands.
    pub correlation_id: String,
    /// Time the command was produced.
    pub timestamp: DateTime<Utc>,
    /// The operation to perform.
    pub operation: Operation,
    /// The resource the operation targets.
    pub resource: String,
    /// Operation arguments.
    pub payload: CommandPayload,
    /// Opaque unique key that dedupes effects under redelivery.
    pub idempotency_key: String,
    /// Redelivery attempt, non-decreasing across retry hops.
    pub attempt: u32,
}

impl Command {
    /// The partition key for this command: the idempotency key for `Create`
    /// (uniform distribution), the stringified message id otherwise
    /// (per-record order). Falls back to the idempotency key when a non-create
    /// command carries no id, so the record is still routable.
    #[must_use]
    pub fn partition_key(&self) -> String {
        match (self.operation, self.payload.id) {
            (Operation::Create, _) | (_, None) => self.idempotency_key.clone(),
            (_, Some(id)) => id.to_string(),
        }
    }
}

/// Terminal status of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    /// The effect was applied (or the read succeeded).
    #[serde(rename = "SUCCESS")]
    Success,
    /// The command failed for a domain reason and will not be retried.
    #[serde(rename = "FAILURE")]
    Failure,
}

impl AckStatus {
    /// Wire/DB name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

/// Structured error carried by a failure ack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckError {
    /// Stable short code, e.g. `NOT_FOUND`.
    pub code: String,
    /// Free-form detail for operators.
    pub detail: String,
}

/// Terminal outcome envelope for one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    /// Trace identifier of the originating command.
    pub trace_id: String,
    /// Terminal status.
    pub status: AckStatus,
    /// Event name, e.g. `MessageCreated`. Empty on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Result payload echoed to the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Error description, present iff `status` is `FAILURE`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
    /// Time the ack was produced.
    pub timestamp: DateTime<Utc>,
}

impl Ack {
    /// Builds a success ack.
    #[must_use]
    pub fn success(
        trace_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            status: AckStatus::Success,
            event: Some(event.into()),
            payload: Some(payload),
            error: None,
            timestamp,
        }
    }

    /// Builds a failure ack.
    #[must_use]
    pub fn failure(
        trace_id: impl Into<String>,
        code: impl Into<String>,
        detail: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            status: AckStatus::Failure,
            event: None,
            payload: None,
            error: Some(AckError {
                code: code.into(),
                detail: detail.into(),
            }),
            timestamp,
        }
    }
}
