//! Prometheus metrics for the step processor.

use std::sync::LazyLock;

use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec,
};

/// Latency of one step execution, labeled by step name.
pub static STEP_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "saga_step_latency_seconds",
        "Latency per saga step",
        &["step"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]
    )
    .expect("register saga_step_latency_seconds")
});

/// Retry hops, labeled by destination stage topic.
pub static RETRIES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        "saga_retries_total",
        "Retry hops by destination stage",
        &["stage"]
    )
    .expect("register saga_retries_total")
});

/// Records quarantined to the DLQ, labeled by error code.
pub static DLQ_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    register_counter_vec!(
        "dlq_messages_total",
        "Records quarantined to the DLQ by error code",
        &["code"]
    )
    .expect("register dlq_messages_total")
});
