//! Integration tests for the step processor over the in-memory broker.

use std::sync::Arc;

use sqlx::PgPool;

use sagaline_core::broker::{RecordConsumer, RecordPublisher};
use sagaline_core::clock::SystemClock;
use sagaline_core::codec::{
    decode_ack, encode_command, HEADER_ATTEMPT, HEADER_ERROR, HEADER_ORIGINAL_TOPIC,
};
use sagaline_core::config::parse_retry_stages;
use sagaline_core::envelope::AckStatus;
use sagaline_core::retry::RetryPlan;
use sagaline_processor::{FaultInjector, ProcessorConfig, StepProcessor};
use sagaline_store::{messages, saga_log};
use sagaline_test_support::{
    create_command, update_command, FlakyPublisher, InMemoryBroker,
};

const GROUP: &str = "processor";

fn config(plan: RetryPlan) -> ProcessorConfig {
    ProcessorConfig {
        commands_topic: "commands".into(),
        acks_topic: "acks".into(),
        dlq_topic: "dlq".into(),
        retry_plan: plan,
        max_transient_inline_retries: 3,
    }
}

fn processor(
    pool: PgPool,
    broker: &InMemoryBroker,
    fault: FaultInjector,
) -> StepProcessor<InMemoryBroker> {
    StepProcessor::new(
        pool,
        broker.clone(),
        Arc::new(SystemClock),
        config(parse_retry_stages("5s,30s,2m").unwrap()),
        fault,
    )
}

/// Publishes `command`, processes one record, and returns control.
async fn deliver_one(broker: &InMemoryBroker, processor: &StepProcessor<InMemoryBroker>) {
    let mut consumer = broker.consumer(GROUP, &["commands"]);
    let record = consumer.next().await.unwrap();
    processor.handle(&mut consumer, record).await.unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_applies_effect_and_acks(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let processor = processor(pool.clone(), &broker, FaultInjector::none());

    let command = create_command("hello");
    broker
        .publish(encode_command(&command, "commands"))
        .await
        .unwrap();
    deliver_one(&broker, &processor).await;

    let acks = broker.records("acks");
    assert_eq!(acks.len(), 1);
    let ack = decode_ack(&acks[0]).unwrap();
    assert_eq!(ack.status, AckStatus::Success);
    assert_eq!(ack.event.as_deref(), Some("MessageCreated"));
    assert_eq!(ack.trace_id, command.trace_id);
    let payload = ack.payload.unwrap();
    assert_eq!(payload["id"], 1);
    assert_eq!(payload["content"], "hello");

    // The ack is keyed like the inbound command.
    assert_eq!(acks[0].key.as_deref(), Some(command.idempotency_key.as_str()));

    let mut conn = pool.acquire().await.unwrap();
    let row = messages::read(&mut conn, 1).await.unwrap();
    assert_eq!(row.content, "hello");

    // Exactly one terminal audit row.
    let entries = saga_log::entries_for_trace(&mut conn, &command.trace_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, "SUCCESS");

    assert_eq!(broker.committed(GROUP, "commands"), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_duplicate_delivery_applies_effect_once(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let processor = processor(pool.clone(), &broker, FaultInjector::none());

    let command = create_command("hello");
    let record = encode_command(&command, "commands");
    broker.publish(record.clone()).await.unwrap();
    broker.publish(record).await.unwrap();
    deliver_one(&broker, &processor).await;
    deliver_one(&broker, &processor).await;

    let acks = broker.records("acks");
    assert_eq!(acks.len(), 2);
    let first = decode_ack(&acks[0]).unwrap();
    let second = decode_ack(&acks[1]).unwrap();
    assert_eq!(first.status, AckStatus::Success);
    assert_eq!(second.status, AckStatus::Success);
    assert_eq!(first.payload, second.payload);
    assert_eq!(first.event, second.event);

    let mut conn = pool.acquire().await.unwrap();
    let row = messages::read(&mut conn, 1).await.unwrap();
    assert_eq!(row.content, "hello");
    assert!(messages::read(&mut conn, 2).await.is_err());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_update_missing_row_fails_without_retry(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let processor = processor(pool.clone(), &broker, FaultInjector::none());

    let command = update_command(999, "x");
    broker
        .publish(encode_command(&command, "commands"))
        .await
        .unwrap();
    deliver_one(&broker, &processor).await;

    let acks = broker.records("acks");
    assert_eq!(acks.len(), 1);
    let ack = decode_ack(&acks[0]).unwrap();
    assert_eq!(ack.status, AckStatus::Failure);
    let error = ack.error.unwrap();
    assert_eq!(error.code, "NOT_FOUND");
    assert_eq!(error.detail, "id=999");

    assert!(broker.records("retry.5s").is_empty());
    assert!(broker.records("dlq").is_empty());

    let mut conn = pool.acquire().await.unwrap();
    let entries = saga_log::entries_for_trace(&mut conn, &command.trace_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, "FAILURE");
    assert_eq!(entries[0].error_code.as_deref(), Some("NOT_FOUND"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_duplicate_failure_re_emits_failure_ack(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let processor = processor(pool.clone(), &broker, FaultInjector::none());

    let command = update_command(999, "x");
    let record = encode_command(&command, "commands");
    broker.publish(record.clone()).await.unwrap();
    broker.publish(record).await.unwrap();
    deliver_one(&broker, &processor).await;
    deliver_one(&broker, &processor).await;

    let acks = broker.records("acks");
    assert_eq!(acks.len(), 2);
    let second = decode_ack(&acks[1]).unwrap();
    assert_eq!(second.status, AckStatus::Failure);
    assert_eq!(second.error.unwrap().code, "NOT_FOUND");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_whitespace_content_fails_without_db_write(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let processor = processor(pool.clone(), &broker, FaultInjector::none());

    broker
        .publish(encode_command(&create_command("   "), "commands"))
        .await
        .unwrap();
    deliver_one(&broker, &processor).await;

    let ack = decode_ack(&broker.records("acks")[0]).unwrap();
    assert_eq!(ack.status, AckStatus::Failure);
    assert_eq!(ack.error.unwrap().code, "INVALID_CONTENT");

    let mut conn = pool.acquire().await.unwrap();
    assert!(messages::read(&mut conn, 1).await.is_err());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_malformed_record_quarantines_directly(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let processor = processor(pool.clone(), &broker, FaultInjector::none());

    let mut record = encode_command(&create_command("ok"), "commands");
    record.payload = b"not json".to_vec();
    broker.publish(record).await.unwrap();
    deliver_one(&broker, &processor).await;

    assert!(broker.records("acks").is_empty());
    assert!(broker.records("retry.5s").is_empty());

    let dlq = broker.records("dlq");
    assert_eq!(dlq.len(), 1);
    assert_eq!(
        dlq[0].headers.get_str(HEADER_ORIGINAL_TOPIC),
        Some("commands")
    );
    assert!(dlq[0]
        .headers
        .get_str(HEADER_ERROR)
        .unwrap()
        .starts_with("MALFORMED"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_transient_failure_hops_to_first_stage(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let processor = processor(pool.clone(), &broker, FaultInjector::transient(1));

    let command = create_command("ok");
    broker
        .publish(encode_command(&command, "commands"))
        .await
        .unwrap();
    deliver_one(&broker, &processor).await;

    assert!(broker.records("acks").is_empty());
    let hops = broker.records("retry.5s");
    assert_eq!(hops.len(), 1);
    assert_eq!(hops[0].headers.get_str(HEADER_ATTEMPT), Some("1"));
    assert_eq!(
        hops[0].headers.get_str(HEADER_ORIGINAL_TOPIC),
        Some("commands")
    );
    assert!(hops[0]
        .headers
        .get_str(HEADER_ERROR)
        .unwrap()
        .starts_with("TRANSIENT_DB"));
    assert_eq!(hops[0].key.as_deref(), Some(command.idempotency_key.as_str()));

    // No effect was applied.
    let mut conn = pool.acquire().await.unwrap();
    assert!(messages::read(&mut conn, 1).await.is_err());
    assert_eq!(broker.committed(GROUP, "commands"), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_exhausted_stages_quarantine_with_attempt_preserved(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let processor = processor(pool.clone(), &broker, FaultInjector::transient(1));

    // A record that already burned through every stage.
    let mut record = encode_command(&create_command("ok"), "commands");
    record.headers.set(HEADER_ATTEMPT, "3");
    broker.publish(record).await.unwrap();
    deliver_one(&broker, &processor).await;

    let dlq = broker.records("dlq");
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].headers.get_str(HEADER_ATTEMPT), Some("3"));
    assert_eq!(
        dlq[0].headers.get_str(HEADER_ORIGINAL_TOPIC),
        Some("commands")
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_fatal_content_quarantines_without_effect(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let processor = processor(
        pool.clone(),
        &broker,
        FaultInjector::fatal_content("poison"),
    );

    broker
        .publish(encode_command(&create_command("poison"), "commands"))
        .await
        .unwrap();
    deliver_one(&broker, &processor).await;

    assert!(broker.records("acks").is_empty());
    let dlq = broker.records("dlq");
    assert_eq!(dlq.len(), 1);
    assert!(dlq[0]
        .headers
        .get_str(HEADER_ERROR)
        .unwrap()
        .starts_with("FATAL"));

    let mut conn = pool.acquire().await.unwrap();
    assert!(messages::read(&mut conn, 1).await.is_err());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_offset_not_committed_when_ack_produce_fails(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let flaky = FlakyPublisher::new(broker.clone(), u32::MAX);
    let processor = StepProcessor::new(
        pool.clone(),
        flaky,
        Arc::new(SystemClock),
        config(parse_retry_stages("5s").unwrap()),
        FaultInjector::none(),
    );

    let command = create_command("durable");
    broker
        .publish(encode_command(&command, "commands"))
        .await
        .unwrap();

    let mut consumer = broker.consumer(GROUP, &["commands"]);
    let record = consumer.next().await.unwrap();
    assert!(processor.handle(&mut consumer, record).await.is_err());

    // DB committed, ack missing, offset uncommitted: the redelivery window.
    assert!(broker.records("acks").is_empty());
    assert_eq!(broker.committed(GROUP, "commands"), 0);
    let mut conn = pool.acquire().await.unwrap();
    assert!(messages::read(&mut conn, 1).await.is_ok());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_redelivery_after_produce_outage_re_emits_without_reapplying(pool: PgPool) {
    let broker = InMemoryBroker::new();
    let flaky = FlakyPublisher::new(broker.clone(), u32::MAX);
    let failing = StepProcessor::new(
        pool.clone(),
        flaky,
        Arc::new(SystemClock),
        config(parse_retry_stages("5s").unwrap()),
        FaultInjector::none(),
    );

    let command = create_command("durable");
    let record = encode_command(&command, "commands");
    broker.publish(record.clone()).await.unwrap();

    let mut consumer = broker.consumer(GROUP, &["commands"]);
    let fetched = consumer.next().await.unwrap();
    assert!(failing.handle(&mut consumer, fetched).await.is_err());

    // Replica restart: same record delivered to a healthy processor.
    let healthy = processor(pool.clone(), &broker, FaultInjector::none());
    broker.publish(record).await.unwrap();
    deliver_one(&broker, &healthy).await;

    let acks = broker.records("acks");
    assert_eq!(acks.len(), 1);
    let ack = decode_ack(&acks[0]).unwrap();
    assert_eq!(ack.status, AckStatus::Success);
    assert_eq!(ack.payload.unwrap()["id"], 1);

    let mut conn = pool.acquire().await.unwrap();
    assert!(messages::read(&mut conn, 1).await.is_ok());
    assert!(messages::read(&mut conn, 2).await.is_err());
}
