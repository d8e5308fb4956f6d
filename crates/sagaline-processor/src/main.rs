//! Step processor service entry point.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sagaline_broker::{KafkaConsumer, KafkaPublisher};
use sagaline_core::clock::SystemClock;
use sagaline_core::config::Config;
use sagaline_processor::{FaultInjector, ProcessorConfig, StepProcessor};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting sagaline step processor");

    let config = Config::from_env().expect("invalid configuration");
    let fault = FaultInjector::parse(&std::env::var("FAIL_MODE").unwrap_or_default())
        .expect("invalid FAIL_MODE");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.db_dsn)
        .await
        .expect("Failed to connect to PostgreSQL");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let publisher =
        KafkaPublisher::connect(&config.broker_endpoints).expect("Failed to create producer");
    let mut consumer = KafkaConsumer::subscribe(
        &config.broker_endpoints,
        &config.consumer_group_processor,
        &[config.commands_topic.as_str()],
    )
    .expect("Failed to join consumer group");

    let processor = StepProcessor::new(
        pool,
        publisher,
        Arc::new(SystemClock),
        ProcessorConfig::from_shared(&config),
        fault,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let run = processor.run(&mut consumer, &cancel);
    tokio::pin!(run);
    tokio::select! {
        () = &mut run => {}
        () = async {
            cancel.cancelled().await;
            tokio::time::sleep(config.shutdown_grace).await;
        } => {
            tracing::warn!("shutdown grace elapsed, abandoning in-flight work");
        }
    }
}
