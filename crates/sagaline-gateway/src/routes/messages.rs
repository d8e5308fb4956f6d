//! Routes submitting message commands.
//!
//! Each handler assigns a fresh trace identity, publishes the command, and
//! returns a 202-style pending acknowledgement. Results resolve through
//! `GET /operations/{trace_id}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{
    Json, Router,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use sagaline_core::codec::encode_command;
use sagaline_core::envelope::{Command, CommandPayload, Operation};

use crate::error::ApiError;
use crate::metrics::COMMANDS_SUBMITTED_TOTAL;
use crate::state::AppState;

/// Request body for POST /messages and PUT /messages/{id}.
#[derive(Debug, Deserialize)]
pub struct MessageBody {
    /// Message content.
    pub content: String,
}

/// Response body returned after a command is accepted.
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    /// Trace identifier to poll `GET /operations/{trace_id}` with.
    pub trace_id: String,
    /// Always `PENDING` at submit time.
    pub status: &'static str,
}

/// Builds the command, publishes it, and registers the pending result.
async fn submit(
    state: &AppState,
    operation: Operation,
    payload: CommandPayload,
) -> Result<AcceptedResponse, ApiError> {
    let command = Command {
        trace_id: Uuid::new_v4().to_string(),
        correlation_id: Uuid::new_v4().to_string(),
        timestamp: state.clock.now(),
        operation,
        resource: "Message".into(),
        payload,
        idempotency_key: Uuid::new_v4().to_string(),
        attempt: 0,
    };

    let record = encode_command(&command, &state.commands_topic);
    state
        .publisher
        .publish(record)
        .await
        .map_err(|e| ApiError::Unavailable(format!("enqueue failed: {e}")))?;

    state.cache.register(&command.trace_id);
    COMMANDS_SUBMITTED_TOTAL
        .with_label_values(&[operation.as_str()])
        .inc();
    info!(trace_id = %command.trace_id, operation = %operation, "command accepted");

    Ok(AcceptedResponse {
        trace_id: command.trace_id,
        status: "PENDING",
    })
}

fn validated_body(body: &MessageBody) -> Result<String, ApiError> {
    let content = body.content.trim();
    if content.is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".into()));
    }
    Ok(content.to_string())
}

/// POST /messages
#[instrument(skip(state, body))]
async fn create_message(
    State(state): State<AppState>,
    Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let content = validated_body(&body)?;
    let accepted = submit(
        &state,
        Operation::Create,
        CommandPayload {
            id: None,
            content: Some(content),
        },
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /messages/{id}
#[instrument(skip(state))]
async fn read_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let accepted = submit(
        &state,
        Operation::Read,
        CommandPayload {
            id: Some(id),
            content: None,
        },
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// PUT /messages/{id}
#[instrument(skip(state, body))]
async fn update_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<MessageBody>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let content = validated_body(&body)?;
    let accepted = submit(
        &state,
        Operation::Update,
        CommandPayload {
            id: Some(id),
            content: Some(content),
        },
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// DELETE /messages/{id}
#[instrument(skip(state))]
async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<AcceptedResponse>), ApiError> {
    let accepted = submit(
        &state,
        Operation::Delete,
        CommandPayload {
            id: Some(id),
            content: None,
        },
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// Returns the messages router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/messages", post(create_message))
        .route(
            "/messages/{id}",
            get(read_message).put(update_message).delete(delete_message),
        )
}
