//! Shared test helpers for gateway integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use sagaline_core::clock::SystemClock;
use sagaline_gateway::cache::ResultCache;
use sagaline_gateway::routes;
use sagaline_gateway::state::AppState;
use sagaline_test_support::InMemoryBroker;

/// Builds the full gateway router over an in-memory broker. Returns the
/// router, the broker (for inspecting published records), and the cache
/// (for seeding acks without a running consumer).
pub fn build_test_app(
    cache_ttl: Duration,
    long_poll: Duration,
) -> (Router, InMemoryBroker, Arc<ResultCache>) {
    let broker = InMemoryBroker::new();
    let clock = Arc::new(SystemClock);
    let cache = Arc::new(ResultCache::new(cache_ttl, clock.clone()));
    let state = AppState::new(
        Arc::new(broker.clone()),
        cache.clone(),
        clock,
        "commands",
        long_poll,
    );
    (routes::router(state), broker, cache)
}

/// Builds the gateway router over an existing broker and cache, for tests
/// that wire the full pipeline behind the HTTP surface.
pub fn build_app_over(
    broker: &InMemoryBroker,
    cache: Arc<ResultCache>,
    long_poll: Duration,
) -> Router {
    let state = AppState::new(
        Arc::new(broker.clone()),
        cache,
        Arc::new(SystemClock),
        "commands",
        long_poll,
    );
    routes::router(state)
}

/// Send a request with an optional JSON body and return status plus parsed
/// body (when one is present).
pub async fn send_json(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<&serde_json::Value>,
) -> (StatusCode, Option<serde_json::Value>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).ok();

    (status, json)
}

/// Send a POST request with a JSON body.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, Option<serde_json::Value>) {
    send_json(app, "POST", uri, Some(body)).await
}

/// Send a GET request.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, Option<serde_json::Value>) {
    send_json(app, "GET", uri, None).await
}
