//! The DLQ replayer.
//!
//! Reads quarantined records and republishes them to the topic recorded in
//! their `original_topic` header. Replay is opt-in (the service only runs
//! when an operator starts it) and idempotent at the processor. An optional
//! trace filter narrows a replay run to one stuck saga.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sagaline_core::broker::{BrokerError, Record, RecordConsumer, RecordPublisher};
use sagaline_core::codec::{HEADER_ORIGINAL_TOPIC, HEADER_TRACE_ID};

/// Republishes DLQ records to their original topic.
pub struct DlqReplayer<P> {
    publisher: P,
    filter_trace_id: Option<String>,
    default_target: Option<String>,
}

impl<P: RecordPublisher> DlqReplayer<P> {
    /// Creates a replayer. `filter_trace_id` narrows replay to one trace;
    /// `default_target` is used for records that carry no `original_topic`
    /// header (legacy quarantines).
    #[must_use]
    pub fn new(
        publisher: P,
        filter_trace_id: Option<String>,
        default_target: Option<String>,
    ) -> Self {
        Self {
            publisher,
            filter_trace_id,
            default_target,
        }
    }

    /// Whether `record` passes the configured trace filter.
    fn matches_filter(&self, record: &Record) -> bool {
        match &self.filter_trace_id {
            Some(wanted) => record.headers.get_str(HEADER_TRACE_ID) == Some(wanted.as_str()),
            None => true,
        }
    }

    /// The replay destination for `record`, if any.
    fn target_topic(&self, record: &Record) -> Option<String> {
        record
            .headers
            .get_str(HEADER_ORIGINAL_TOPIC)
            .map(str::to_string)
            .or_else(|| self.default_target.clone())
    }

    /// Runs the replay loop until `cancel` fires.
    pub async fn run<C: RecordConsumer>(&self, consumer: &mut C, cancel: &CancellationToken) {
        info!(filter = ?self.filter_trace_id, "DLQ replayer running");
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

            match self.replay(&record).await {
                Ok(()) => {
                    if let Err(e) = consumer.commit(&record).await {
                        warn!(error = %e, "offset commit failed");
                    }
                }
                // Offset untouched; the DLQ redelivers the record.
                Err(e) => warn!(error = %e, "replay produce failed"),
            }
        }
        info!("DLQ replayer stopped");
    }

    /// Replays one record. Non-matching and untargetable records are
    /// acknowledged without replay.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] when the replay produce fails.
    pub async fn replay(&self, record: &Record) -> Result<(), BrokerError> {
        if !self.matches_filter(record) {
            return Ok(());
        }
        let Some(target) = self.target_topic(record) else {
            warn!(
                trace_id = record.headers.get_str(HEADER_TRACE_ID).unwrap_or("?"),
                "DLQ record has no original_topic and no default target, skipping"
            );
            return Ok(());
        };

        let out = Record::new(
            &target,
            record.key.clone(),
            record.payload.clone(),
            record.headers.clone(),
            Utc::now(),
        );
        self.publisher.publish(out).await?;
        info!(
            trace_id = record.headers.get_str(HEADER_TRACE_ID).unwrap_or("?"),
            target = %target,
            "replayed DLQ record"
        );
        Ok(())
    }
}
