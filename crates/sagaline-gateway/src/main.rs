//! Gateway service entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sagaline_broker::{KafkaConsumer, KafkaPublisher};
use sagaline_core::clock::SystemClock;
use sagaline_core::config::Config;
use sagaline_gateway::cache::ResultCache;
use sagaline_gateway::state::AppState;
use sagaline_gateway::{ack_consumer, routes};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting sagaline gateway");

    let config = Config::from_env().expect("invalid configuration");
    let clock = Arc::new(SystemClock);

    let publisher = Arc::new(
        KafkaPublisher::connect(&config.broker_endpoints).expect("Failed to create producer"),
    );
    let cache = Arc::new(ResultCache::new(config.result_cache_ttl, clock.clone()));

    let cancel = CancellationToken::new();

    // Background ack consumer feeding the cache.
    let mut acks = KafkaConsumer::subscribe(
        &config.broker_endpoints,
        &config.consumer_group_ackcache,
        &[config.acks_topic.as_str()],
    )
    .expect("Failed to join ack consumer group");
    let ack_cache = cache.clone();
    let ack_cancel = cancel.clone();
    let ack_task = tokio::spawn(async move {
        ack_consumer::run(ack_cache, &mut acks, &ack_cancel).await;
    });

    // Cache sweeper.
    let sweep_cache = cache.clone();
    let sweep_cancel = cancel.clone();
    let sweep_task = tokio::spawn(async move {
        sweep_cache.run_sweeper(&sweep_cancel).await;
    });

    let state = AppState::new(
        publisher,
        cache,
        clock,
        config.commands_topic.clone(),
        config.long_poll_timeout,
    );

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = config.http_addr.parse().expect("Invalid HTTP_ADDR");
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            shutdown_cancel.cancel();
        })
        .await
        .expect("Server error");

    // Drain background tasks within the grace period.
    cancel.cancel();
    let drain = async {
        ack_task.await.ok();
        sweep_task.await.ok();
    };
    if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
        tracing::warn!("shutdown grace elapsed, abandoning background tasks");
    }
}
