//! HTTP routes for the gateway.

pub mod health;
pub mod messages;
pub mod metrics;
pub mod operations;

use axum::Router;

use crate::state::AppState;

/// Builds the full gateway router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .merge(messages::router())
        .merge(operations::router())
        .with_state(state)
}
