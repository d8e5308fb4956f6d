//! Background ack consumer.
//!
//! One consumer-group member on the acks topic, feeding the result cache.
//! Malformed acks are logged and skipped; their offsets still commit so the
//! group never wedges on a bad record.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sagaline_core::broker::RecordConsumer;
use sagaline_core::codec::decode_ack;

use crate::cache::ResultCache;
use crate::metrics::ACKS_CACHED_TOTAL;

/// Runs the ack-indexing loop until `cancel` fires.
pub async fn run<C: RecordConsumer>(
    cache: Arc<ResultCache>,
    consumer: &mut C,
    cancel: &CancellationToken,
) {
    info!("ack consumer running");
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

        match decode_ack(&record) {
            Ok(ack) => {
                cache.insert(ack);
                ACKS_CACHED_TOTAL.inc();
            }
            Err(e) => warn!(error = %e, "skipping malformed ack"),
        }
        if let Err(e) = consumer.commit(&record).await {
            warn!(error = %e, "offset commit failed");
        }
    }
    info!("ack consumer stopped");
}
