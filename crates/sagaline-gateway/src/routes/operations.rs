//! Result lookup with bounded long-poll.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::instrument;

use crate::cache::LookupResult;
use crate::state::AppState;

/// Interval between cache checks during a long-poll.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Query parameters for GET /operations/{trace_id}.
#[derive(Debug, Default, Deserialize)]
pub struct OperationQuery {
    /// Per-request long-poll budget in milliseconds, clamped to the
    /// configured maximum.
    pub timeout_ms: Option<u64>,
}

/// GET /operations/{trace_id}
///
/// Returns 200 with the ack once it is cached, 204 while the result is still
/// pending within the long-poll budget, and 410 once the TTL elapsed.
#[instrument(skip(state, query), fields(trace_id = %trace_id))]
async fn operation_result(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
    Query(query): Query<OperationQuery>,
) -> Response {
    let budget = query
        .timeout_ms
        .map_or(state.long_poll_timeout, Duration::from_millis)
        .min(state.long_poll_timeout);
    let deadline = Instant::now() + budget;

    loop {
        match state.cache.lookup(&trace_id) {
            LookupResult::Ready(ack) => return (StatusCode::OK, Json(ack)).into_response(),
            LookupResult::Expired => return StatusCode::GONE.into_response(),
            LookupResult::Pending => {}
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return StatusCode::NO_CONTENT.into_response();
        }
        tokio::time::sleep(remaining.min(POLL_INTERVAL)).await;
    }
}

/// Returns the operations router.
pub fn router() -> Router<AppState> {
    Router::new().route("/operations/{trace_id}", get(operation_result))
}
