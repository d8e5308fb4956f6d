//! Step error taxonomy.
//!
//! Every failure crossing a component boundary is translated into one of
//! these categories before routing decides where the record goes next.
//! Retries never cross category boundaries.

use thiserror::Error;

/// Classified failure of one step execution.
#[derive(Debug, Error)]
pub enum StepError {
    /// The record body or headers could not be decoded.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Domain validation failed (empty content, non-positive id).
    #[error("invalid content: {0}")]
    InvalidContent(String),

    /// The targeted message does not exist.
    #[error("not found: id={0}")]
    NotFound(i64),

    /// A failure that is expected to clear on redelivery.
    #[error("transient failure: {0}")]
    Transient(String),

    /// An unrecoverable failure; the record is quarantined.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

/// Where a failed record goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Emit a FAILURE ack; the step completed from the runtime's view.
    FailAck,
    /// Route to the next retry stage (or DLQ once stages are exhausted).
    Retry,
    /// Route directly to the DLQ.
    Quarantine,
}

impl StepError {
    /// Stable short code carried in the `error` header and failure acks.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "MALFORMED",
            Self::InvalidContent(_) => "INVALID_CONTENT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Transient(_) => "TRANSIENT_DB",
            Self::Fatal(_) => "FATAL",
        }
    }

    /// Routing decision for this category.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::InvalidContent(_) | Self::NotFound(_) => Disposition::FailAck,
            Self::Transient(_) => Disposition::Retry,
            Self::MalformedEnvelope(_) | Self::Fatal(_) => Disposition::Quarantine,
        }
    }

    /// Detail string for the `error` header and operator logs.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::MalformedEnvelope(d)
            | Self::InvalidContent(d)
            | Self::Transient(d)
            | Self::Fatal(d) => d.clone(),
            Self::NotFound(id) => format!("id={id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_ack_without_retry() {
        assert_eq!(
            StepError::NotFound(9).disposition(),
            Disposition::FailAck
        );
        assert_eq!(
            StepError::InvalidContent("empty".into()).disposition(),
            Disposition::FailAck
        );
    }

    #[test]
    fn test_transient_routes_to_retry() {
        assert_eq!(
            StepError::Transient("db timeout".into()).disposition(),
            Disposition::Retry
        );
    }

    #[test]
    fn test_malformed_and_fatal_quarantine() {
        assert_eq!(
            StepError::MalformedEnvelope("no trace_id".into()).disposition(),
            Disposition::Quarantine
        );
        assert_eq!(
            StepError::Fatal("poison".into()).disposition(),
            Disposition::Quarantine
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(StepError::NotFound(1).code(), "NOT_FOUND");
        assert_eq!(StepError::Transient(String::new()).code(), "TRANSIENT_DB");
        assert_eq!(
            StepError::MalformedEnvelope(String::new()).code(),
            "MALFORMED"
        );
    }

    #[test]
    fn test_not_found_detail_names_the_id() {
        assert_eq!(StepError::NotFound(999).detail(), "id=999");
    }
}
