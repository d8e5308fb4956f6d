//! Command fixtures.

use chrono::Utc;
use uuid::Uuid;

use sagaline_core::envelope::{Command, CommandPayload, Operation};

fn command(operation: Operation, payload: CommandPayload) -> Command {
    Command {
        trace_id: Uuid::new_v4().to_string(),
        correlation_id: Uuid::new_v4().to_string(),
        timestamp: Utc::now(),
        operation,
        resource: "Message".into(),
        payload,
        idempotency_key: Uuid::new_v4().to_string(),
        attempt: 0,
    }
}

/// A fresh `Create` command.
#[must_use]
pub fn create_command(content: &str) -> Command {
    command(
        Operation::Create,
        CommandPayload {
            id: None,
            content: Some(content.into()),
        },
    )
}

/// A fresh `Read` command.
#[must_use]
pub fn read_command(id: i64) -> Command {
    command(
        Operation::Read,
        CommandPayload {
            id: Some(id),
            content: None,
        },
    )
}

/// A fresh `Update` command.
#[must_use]
pub fn update_command(id: i64, content: &str) -> Command {
    command(
        Operation::Update,
        CommandPayload {
            id: Some(id),
            content: Some(content.into()),
        },
    )
}

/// A fresh `Delete` command.
#[must_use]
pub fn delete_command(id: i64) -> Command {
    command(
        Operation::Delete,
        CommandPayload {
            id: Some(id),
            content: None,
        },
    )
}
