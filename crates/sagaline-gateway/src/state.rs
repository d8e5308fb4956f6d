//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use sagaline_core::broker::RecordPublisher;
use sagaline_core::clock::Clock;

use crate::cache::ResultCache;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Shared idempotent producer.
    pub publisher: Arc<dyn RecordPublisher>,
    /// Result cache fed by the ack consumer.
    pub cache: Arc<ResultCache>,
    /// Clock for command timestamps.
    pub clock: Arc<dyn Clock>,
    /// Topic commands are published to.
    pub commands_topic: String,
    /// Upper bound on a single long-poll.
    pub long_poll_timeout: Duration,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        publisher: Arc<dyn RecordPublisher>,
        cache: Arc<ResultCache>,
        clock: Arc<dyn Clock>,
        commands_topic: impl Into<String>,
        long_poll_timeout: Duration,
    ) -> Self {
        Self {
            publisher,
            cache,
            clock,
            commands_topic: commands_topic.into(),
            long_poll_timeout,
        }
    }
}
