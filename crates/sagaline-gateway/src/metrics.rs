//! Prometheus metrics for the gateway.

use std::sync::LazyLock;

use prometheus::{register_counter, register_counter_vec, Counter, CounterVec};

/// Acks indexed into the result cache.
pub static ACKS_CACHED_TOTAL: LazyLock<Counter> = LazyLock::new(|| {
    register_counter!("acks_cached_total", "Acks indexed into the result cache")
        .expect("register acks_cached_total")
});

/// Commands accepted and published, labeled by operation.
pub static COMMANDS_SUBMITTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        "commands_submitted_total",
        "Commands accepted and published",
        &["operation"]
    )
    .expect("register commands_submitted_total")
});
