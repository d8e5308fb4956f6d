//! Sagaline Requeue — delayed re-queuing and DLQ replay.
//!
//! Two small services own the broker-side failure plumbing: the re-queuer
//! returns delayed records from the retry stages to the commands topic, and
//! the replayer re-injects repaired DLQ records at their original stage.
//! Neither touches domain state.

pub mod replayer;
pub mod requeuer;

pub use replayer::DlqReplayer;
pub use requeuer::Requeuer;
