//! DLQ replayer service entry point.

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sagaline_broker::{KafkaConsumer, KafkaPublisher};
use sagaline_core::config::Config;
use sagaline_requeue::DlqReplayer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting sagaline DLQ replayer");

    let config = Config::from_env().expect("invalid configuration");

    let publisher =
        KafkaPublisher::connect(&config.broker_endpoints).expect("Failed to create producer");
    let mut consumer = KafkaConsumer::subscribe(
        &config.broker_endpoints,
        &config.consumer_group_replayer,
        &[config.dlq_topic.as_str()],
    )
    .expect("Failed to join consumer group");

    let replayer = DlqReplayer::new(
        publisher,
        config.replay_filter_trace_id.clone(),
        config.replay_target_topic.clone(),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    replayer.run(&mut consumer, &cancel).await;
}
