//! The retry re-queuer.
//!
//! Consumes every stage topic as one group member and, per record, sleeps
//! the remainder of the stage delay (measured from the record timestamp)
//! before producing the record back to the commands topic with key, value,
//! and headers preserved. The offset commits only after the produce, so a
//! crash mid-delay redelivers the record rather than dropping it.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sagaline_core::broker::{BrokerError, Record, RecordConsumer, RecordPublisher};
use sagaline_core::retry::RetryPlan;

/// Moves delayed records from the retry stages back to the commands topic.
pub struct Requeuer<P> {
    publisher: P,
    plan: RetryPlan,
    commands_topic: String,
}

impl<P: RecordPublisher> Requeuer<P> {
    /// Creates a re-queuer producing to `commands_topic`.
    #[must_use]
    pub fn new(publisher: P, plan: RetryPlan, commands_topic: impl Into<String>) -> Self {
        Self {
            publisher,
            plan,
            commands_topic: commands_topic.into(),
        }
    }

    /// The remaining sleep for `record`: the stage delay minus the time the
    /// record already spent on the stage topic.
    fn remaining_delay(&self, record: &Record) -> Duration {
        let Some(delay) = self.plan.delay_for_topic(&record.topic) else {
            return Duration::ZERO;
        };
        let elapsed = (Utc::now() - record.timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO);
        delay.saturating_sub(elapsed)
    }

    /// Runs the re-queue loop until `cancel` fires. A record mid-sleep when
    /// cancellation arrives is left uncommitted for redelivery.
    pub async fn run<C: RecordConsumer>(&self, consumer: &mut C, cancel: &CancellationToken) {
        info!(stages = ?self.plan.topics(), "re-queuer running");
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

            let delay = self.remaining_delay(&record);
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            match self.requeue(&record).await {
                Ok(()) => {
                    if let Err(e) = consumer.commit(&record).await {
                        warn!(error = %e, "offset commit failed");
                    }
                }
                // Offset untouched; the stage redelivers the record.
                Err(e) => warn!(error = %e, stage = %record.topic, "re-queue produce failed"),
            }
        }
        info!("re-queuer stopped");
    }

    /// Produces `record` to the commands topic, headers preserved.
    async fn requeue(&self, record: &Record) -> Result<(), BrokerError> {
        let out = Record::new(
            &self.commands_topic,
            record.key.clone(),
            record.payload.clone(),
            record.headers.clone(),
            Utc::now(),
        );
        self.publisher.publish(out).await
    }
}
