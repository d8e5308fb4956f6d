//! Retry re-queuer service entry point.

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sagaline_broker::{KafkaConsumer, KafkaPublisher};
use sagaline_core::config::Config;
use sagaline_requeue::Requeuer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting sagaline retry re-queuer");

    let config = Config::from_env().expect("invalid configuration");
    let stage_topics = config.retry_stages.topics();
    let subscription: Vec<&str> = stage_topics.iter().map(String::as_str).collect();

    let publisher =
        KafkaPublisher::connect(&config.broker_endpoints).expect("Failed to create producer");
    let mut consumer = KafkaConsumer::subscribe(
        &config.broker_endpoints,
        &config.consumer_group_requeuer,
        &subscription,
    )
    .expect("Failed to join consumer group");

    let requeuer = Requeuer::new(
        publisher,
        config.retry_stages.clone(),
        config.commands_topic.clone(),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    requeuer.run(&mut consumer, &cancel).await;
}
