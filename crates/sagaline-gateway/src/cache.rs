//! TTL-bounded result cache.
//!
//! Maps `trace_id` to the latest ack. Entries are registered as pending at
//! submit time so expiry without a result is observable; a periodic sweeper
//! evicts entries, retaining expired ones for one extra TTL so late polls
//! still see the expiry instead of an indistinguishable miss.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sagaline_core::clock::Clock;
use sagaline_core::envelope::{Ack, AckStatus};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum LookupResult {
    /// The terminal ack arrived.
    Ready(Ack),
    /// No ack yet; keep polling.
    Pending,
    /// The TTL elapsed; the result is gone.
    Expired,
}

#[derive(Debug)]
enum Slot {
    Pending { expires_at: DateTime<Utc> },
    Ready { ack: Ack, expires_at: DateTime<Utc> },
}

impl Slot {
    fn expires_at(&self) -> DateTime<Utc> {
        match self {
            Self::Pending { expires_at } | Self::Ready { expires_at, .. } => *expires_at,
        }
    }
}

/// Shared ack cache: one writer (the ack consumer), many readers (the HTTP
/// handlers), guarded by a read-preferring lock.
pub struct ResultCache {
    entries: RwLock<HashMap<String, Slot>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    /// Creates a cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn deadline(&self) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero())
    }

    /// Registers a pending entry for a freshly submitted trace.
    pub fn register(&self, trace_id: &str) {
        let mut entries = self.entries.write().unwrap();
        entries
            .entry(trace_id.to_string())
            .or_insert(Slot::Pending {
                expires_at: self.deadline(),
            });
    }

    /// Caches an ack. Duplicate acks for the same trace are idempotent; the
    /// most recent SUCCESS wins over prior FAILUREs.
    pub fn insert(&self, ack: Ack) {
        let mut entries = self.entries.write().unwrap();
        if let Some(Slot::Ready { ack: existing, .. }) = entries.get(&ack.trace_id) {
            if existing.status == AckStatus::Success && ack.status == AckStatus::Failure {
                return;
            }
        }
        entries.insert(
            ack.trace_id.clone(),
            Slot::Ready {
                ack,
                expires_at: self.deadline(),
            },
        );
    }

    /// Looks up the result for a trace.
    #[must_use]
    pub fn lookup(&self, trace_id: &str) -> LookupResult {
        let entries = self.entries.read().unwrap();
        match entries.get(trace_id) {
            None => LookupResult::Pending,
            Some(slot) if self.clock.now() > slot.expires_at() => LookupResult::Expired,
            Some(Slot::Pending { .. }) => LookupResult::Pending,
            Some(Slot::Ready { ack, .. }) => LookupResult::Ready(ack.clone()),
        }
    }

    /// Evicts entries expired for more than one TTL.
    pub fn sweep(&self) {
        let horizon = self.clock.now()
            - chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, slot| slot.expires_at() > horizon);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "swept result cache");
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the periodic sweeper until `cancel` fires.
    pub async fn run_sweeper(&self, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(SWEEP_INTERVAL) => self.sweep(),
            }
        }
    }
}
