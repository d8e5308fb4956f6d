//! The step processor: consumer → handler → producer loop.
//!
//! Per record the processor executes one saga step inside a single database
//! transaction (domain effect, idempotency record, saga-log row), then
//! produces the terminal ack and only afterwards commits the consumer
//! offset. Failures are classified and routed: domain failures become
//! FAILURE acks, transient failures hop to the staged retry topics,
//! malformed/fatal records are quarantined to the DLQ.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use sagaline_core::broker::{BrokerError, Record, RecordConsumer, RecordPublisher};
use sagaline_core::clock::Clock;
use sagaline_core::codec::{
    decode_command, encode_ack, failure_hop, record_attempt,
};
use sagaline_core::config::Config;
use sagaline_core::envelope::{Ack, AckStatus, Command, Operation};
use sagaline_core::error::{Disposition, StepError};
use sagaline_core::retry::RetryPlan;
use sagaline_store::saga_log::SagaStatus;
use sagaline_store::{idempotency, messages, saga_log, StoreError};

use crate::fault::FaultInjector;
use crate::metrics::{DLQ_TOTAL, RETRIES_TOTAL, STEP_LATENCY};

/// Base delay for in-place retries (commit conflicts and ack produces).
const INLINE_BACKOFF: Duration = Duration::from_millis(100);
/// Produce attempts before the record is left uncommitted for redelivery.
const PRODUCE_ATTEMPTS: u32 = 4;

/// Step processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Main work topic (the first hop's `original_topic`).
    pub commands_topic: String,
    /// Terminal result topic.
    pub acks_topic: String,
    /// Quarantine topic.
    pub dlq_topic: String,
    /// Ordered delay stages.
    pub retry_plan: RetryPlan,
    /// In-place commit retries on transient conflict.
    pub max_transient_inline_retries: u32,
}

impl ProcessorConfig {
    /// Extracts the processor's view of the shared configuration.
    #[must_use]
    pub fn from_shared(config: &Config) -> Self {
        Self {
            commands_topic: config.commands_topic.clone(),
            acks_topic: config.acks_topic.clone(),
            dlq_topic: config.dlq_topic.clone(),
            retry_plan: config.retry_stages.clone(),
            max_transient_inline_retries: config.max_transient_inline_retries,
        }
    }
}

/// Failure of one transactional attempt.
enum TxFailure {
    /// The commit hit a transient conflict; the whole transaction may be
    /// retried in place.
    CommitConflict(String),
    /// A classified failure that routes outside the processor.
    Step(StepError),
}

impl From<StoreError> for TxFailure {
    fn from(err: StoreError) -> Self {
        Self::Step(err.into())
    }
}

impl From<sqlx::Error> for TxFailure {
    fn from(err: sqlx::Error) -> Self {
        Self::Step(StoreError::Database(err).into())
    }
}

/// One saga step worker.
pub struct StepProcessor<P> {
    pool: PgPool,
    publisher: P,
    clock: Arc<dyn Clock>,
    config: ProcessorConfig,
    fault: FaultInjector,
}

impl<P: RecordPublisher> StepProcessor<P> {
    /// Creates a processor over `pool` and `publisher`.
    #[must_use]
    pub fn new(
        pool: PgPool,
        publisher: P,
        clock: Arc<dyn Clock>,
        config: ProcessorConfig,
        fault: FaultInjector,
    ) -> Self {
        Self {
            pool,
            publisher,
            clock,
            config,
            fault,
        }
    }

    /// Runs the consume loop until `cancel` fires. In-flight records run to
    /// completion; the offset of a record whose ack produce failed stays
    /// uncommitted so the broker redelivers it.
    pub async fn run<C: RecordConsumer>(&self, consumer: &mut C, cancel: &CancellationToken) {
        info!(topic = %self.config.commands_topic, "step processor running");
        loop {
            let record = tokio::select! {
                () = cancel.cancelled() => break,
                fetched = consumer.next() => match fetched {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "fetch failed");
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(Duration::from_secs(1)) => continue,
                        }
                    }
                },
            };

            if let Err(e) = self.handle(consumer, record).await {
                // Offset untouched; the record comes back on redelivery and
                // the idempotency record protects the effect.
                warn!(error = %e, code = "PRODUCER_FAILURE", "record left for redelivery");
            }
        }
        info!("step processor stopped");
    }

    /// Processes one record end-to-end: execute, produce the follow-up
    /// record, then commit the offset.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] when the produce never succeeded (the offset
    /// is left uncommitted) or the offset commit itself failed.
    pub async fn handle<C: RecordConsumer>(
        &self,
        consumer: &mut C,
        record: Record,
    ) -> Result<(), BrokerError> {
        let outbound = self.route(&record).await;
        self.publish_with_retry(&outbound).await?;
        consumer.commit(&record).await
    }

    /// Decides the single follow-up record for `record`: an ack, a retry
    /// hop, or a DLQ hop.
    async fn route(&self, record: &Record) -> Record {
        let command = match decode_command(record) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, topic = %record.topic, "malformed record quarantined");
                return self.quarantine(record, record_attempt(record), &e);
            }
        };

        let timer = STEP_LATENCY
            .with_label_values(&[command.operation.step_name()])
            .start_timer();
        let executed = self.execute(&command).await;
        timer.observe_duration();

        match executed {
            Ok(ack) => {
                info!(
                    trace_id = %command.trace_id,
                    operation = %command.operation,
                    status = ack.status.as_str(),
                    "step complete"
                );
                encode_ack(&ack, &self.config.acks_topic, record.key.clone())
            }
            Err(e) => self.route_failure(record, &command, &e),
        }
    }

    fn route_failure(&self, record: &Record, command: &Command, error: &StepError) -> Record {
        match error.disposition() {
            Disposition::Retry => match self.config.retry_plan.stage_for(command.attempt) {
                Some(stage) => {
                    RETRIES_TOTAL.with_label_values(&[stage.topic.as_str()]).inc();
                    info!(
                        trace_id = %command.trace_id,
                        attempt = command.attempt + 1,
                        stage = %stage.topic,
                        "transient failure, routing to retry stage"
                    );
                    failure_hop(
                        record,
                        &stage.topic,
                        command.attempt + 1,
                        error.code(),
                        &error.detail(),
                        &self.config.commands_topic,
                        self.clock.now(),
                    )
                }
                None => {
                    warn!(
                        trace_id = %command.trace_id,
                        attempt = command.attempt,
                        "retry stages exhausted, quarantining"
                    );
                    self.quarantine(record, command.attempt, error)
                }
            },
            // Domain failures never reach here (they become FAILURE acks
            // inside the transaction); everything else quarantines.
            Disposition::FailAck | Disposition::Quarantine => {
                warn!(trace_id = %command.trace_id, error = %error, "quarantining record");
                self.quarantine(record, command.attempt, error)
            }
        }
    }

    fn quarantine(&self, record: &Record, attempt: u32, error: &StepError) -> Record {
        DLQ_TOTAL.with_label_values(&[error.code()]).inc();
        failure_hop(
            record,
            &self.config.dlq_topic,
            attempt,
            error.code(),
            &error.detail(),
            &self.config.commands_topic,
            self.clock.now(),
        )
    }

    /// Executes the step, retrying the transaction in place when the commit
    /// hits a transient conflict.
    #[instrument(skip(self, command), fields(trace_id = %command.trace_id))]
    async fn execute(&self, command: &Command) -> Result<Ack, StepError> {
        if self.fault.is_fatal_content(command.payload.content.as_deref()) {
            return Err(StepError::Fatal("content matches fault marker".into()));
        }
        if self.fault.take_transient() {
            return Err(StepError::Transient("injected connection failure".into()));
        }

        let mut inline = 0;
        loop {
            match self.execute_tx(command).await {
                Ok(ack) => return Ok(ack),
                Err(TxFailure::CommitConflict(reason))
                    if inline < self.config.max_transient_inline_retries =>
                {
                    inline += 1;
                    warn!(inline, reason = %reason, "commit conflict, retrying in place");
                    tokio::time::sleep(INLINE_BACKOFF * 2u32.pow(inline - 1)).await;
                }
                Err(TxFailure::CommitConflict(reason)) => {
                    return Err(StepError::Transient(reason));
                }
                Err(TxFailure::Step(e)) => return Err(e),
            }
        }
    }

    /// One transactional attempt: idempotency check, effect, audit, commit.
    async fn execute_tx(&self, command: &Command) -> Result<Ack, TxFailure> {
        let mut tx = self.pool.begin().await?;

        if let Some(prior) =
            idempotency::check_and_mark(&mut tx, &command.idempotency_key, &command.trace_id)
                .await?
        {
            let ack = match prior.status() {
                Some(AckStatus::Success) => {
                    info!(trace_id = %command.trace_id, "duplicate delivery, re-emitting success ack");
                    let latest = saga_log::latest_for_trace(&mut tx, &prior.trace_id).await?;
                    let payload = latest
                        .and_then(|entry| entry.detail)
                        .and_then(|detail| serde_json::from_str(&detail).ok())
                        .unwrap_or_else(|| echo_payload(command));
                    Ack::success(
                        command.trace_id.clone(),
                        command.operation.event_name(),
                        payload,
                        self.clock.now(),
                    )
                }
                Some(AckStatus::Failure) => {
                    let latest = saga_log::latest_for_trace(&mut tx, &prior.trace_id).await?;
                    let (code, detail) = latest
                        .map(|entry| {
                            (
                                entry.error_code.unwrap_or_else(|| "FAILURE".into()),
                                entry.detail.unwrap_or_default(),
                            )
                        })
                        .unwrap_or_else(|| ("FAILURE".into(), String::new()));
                    info!(trace_id = %command.trace_id, code = %code, "duplicate delivery, re-emitting failure ack");
                    Ack::failure(command.trace_id.clone(), code, detail, self.clock.now())
                }
                // A committed PENDING row means another member holds the key.
                None => {
                    return Err(TxFailure::Step(StepError::Transient(
                        "idempotency key claimed concurrently".into(),
                    )))
                }
            };
            tx.commit().await?;
            return Ok(ack);
        }

        let step = command.operation.step_name();
        match apply(&mut tx, command).await {
            Ok((event, payload)) => {
                // The result payload rides in the audit row so a duplicate
                // delivery can re-emit an equivalent ack.
                saga_log::append(
                    &mut tx,
                    &command.trace_id,
                    step,
                    SagaStatus::Success,
                    None,
                    Some(&payload.to_string()),
                )
                .await?;
                idempotency::record_outcome(&mut tx, &command.idempotency_key, AckStatus::Success)
                    .await?;
                commit(tx).await?;
                Ok(Ack::success(
                    command.trace_id.clone(),
                    event,
                    payload,
                    self.clock.now(),
                ))
            }
            Err(store_err) => {
                let step_err = StepError::from(store_err);
                if step_err.disposition() != Disposition::FailAck {
                    // Transient/fatal: roll back so redelivery reprocesses.
                    tx.rollback().await.ok();
                    return Err(TxFailure::Step(step_err));
                }

                saga_log::append(
                    &mut tx,
                    &command.trace_id,
                    step,
                    SagaStatus::Failure,
                    Some(step_err.code()),
                    Some(&step_err.detail()),
                )
                .await?;
                idempotency::record_outcome(&mut tx, &command.idempotency_key, AckStatus::Failure)
                    .await?;
                commit(tx).await?;
                Ok(Ack::failure(
                    command.trace_id.clone(),
                    step_err.code(),
                    step_err.detail(),
                    self.clock.now(),
                ))
            }
        }
    }

    /// Produces `record` with bounded in-place retries.
    async fn publish_with_retry(&self, record: &Record) -> Result<(), BrokerError> {
        let mut last = None;
        for attempt in 0..PRODUCE_ATTEMPTS {
            match self.publisher.publish(record.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, attempt, topic = %record.topic, "produce failed");
                    last = Some(e);
                    if attempt + 1 < PRODUCE_ATTEMPTS {
                        tokio::time::sleep(INLINE_BACKOFF * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        Err(last.unwrap_or(BrokerError::Publish {
            topic: record.topic.clone(),
            reason: "no attempt made".into(),
        }))
    }
}

/// Dispatches the operation to the domain repository.
async fn apply(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    command: &Command,
) -> Result<(String, serde_json::Value), StoreError> {
    let payload = &command.payload;
    let event = command.operation.event_name().to_string();
    match command.operation {
        Operation::Create => {
            let content = payload.content.as_deref().unwrap_or_default();
            let row = messages::create(tx, content).await?;
            Ok((event, serde_json::json!({"id": row.id, "content": row.content})))
        }
        Operation::Read => {
            let id = required_id(payload.id)?;
            let row = messages::read(tx, id).await?;
            Ok((event, serde_json::json!({"id": row.id, "content": row.content})))
        }
        Operation::Update => {
            let id = required_id(payload.id)?;
            let content = payload.content.as_deref().unwrap_or_default();
            let row = messages::update(tx, id, content).await?;
            Ok((event, serde_json::json!({"id": row.id, "content": row.content})))
        }
        Operation::Delete => {
            let id = required_id(payload.id)?;
            messages::delete(tx, id).await?;
            Ok((event, serde_json::json!({"id": id})))
        }
    }
}

fn required_id(id: Option<i64>) -> Result<i64, StoreError> {
    id.ok_or_else(|| StoreError::InvalidContent("missing id".into()))
}

/// Echo payload for a duplicate success ack, rebuilt from the command.
fn echo_payload(command: &Command) -> serde_json::Value {
    let mut echo = serde_json::Map::new();
    if let Some(id) = command.payload.id {
        echo.insert("id".into(), id.into());
    }
    if let Some(content) = &command.payload.content {
        echo.insert("content".into(), content.clone().into());
    }
    serde_json::Value::Object(echo)
}

/// Commits the transaction, distinguishing transient conflicts so the whole
/// attempt can be retried in place.
async fn commit(tx: sqlx::Transaction<'_, sqlx::Postgres>) -> Result<(), TxFailure> {
    tx.commit().await.map_err(|e| {
        let err = StoreError::Database(e);
        if err.is_transient() {
            TxFailure::CommitConflict(err.to_string())
        } else {
            TxFailure::Step(err.into())
        }
    })
}
