//! Prometheus metrics endpoint.

use axum::http::StatusCode;
use axum::{routing::get, Router};
use prometheus::TextEncoder;

use crate::state::AppState;

/// GET /metrics
async fn metrics() -> Result<String, StatusCode> {
    TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Returns the metrics router.
pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics))
}
