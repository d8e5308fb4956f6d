//! Store error types and transient classification.

use thiserror::Error;

use sagaline_core::error::StepError;

/// Persistence-layer error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The targeted message does not exist.
    #[error("message not found: id={0}")]
    NotFound(i64),

    /// Domain validation failed before touching the database.
    #[error("invalid content: {0}")]
    InvalidContent(String),

    /// An underlying database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Postgres SQLSTATEs that clear on retry: serialization failure and
/// deadlock detected.
const TRANSIENT_SQLSTATES: [&str; 2] = ["40001", "40P01"];

impl StoreError {
    /// Whether redelivering the command may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::InvalidContent(_) => false,
            Self::Database(e) => match e {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
                sqlx::Error::Database(db) => db
                    .code()
                    .is_some_and(|code| TRANSIENT_SQLSTATES.contains(&code.as_ref())),
                _ => false,
            },
        }
    }
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::InvalidContent(detail) => Self::InvalidContent(detail),
            StoreError::Database(e) => {
                let db = StoreError::Database(e);
                if db.is_transient() {
                    Self::Transient(db.to_string())
                } else {
                    Self::Fatal(db.to_string())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_are_not_transient() {
        assert!(!StoreError::NotFound(1).is_transient());
        assert!(!StoreError::InvalidContent("empty".into()).is_transient());
    }

    #[test]
    fn test_io_errors_are_transient() {
        let err = StoreError::Database(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        )));
        assert!(err.is_transient());
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_conversion_preserves_category() {
        assert!(matches!(
            StepError::from(StoreError::NotFound(9)),
            StepError::NotFound(9)
        ));
        assert!(matches!(
            StepError::from(StoreError::Database(sqlx::Error::PoolTimedOut)),
            StepError::Transient(_)
        ));
        assert!(matches!(
            StepError::from(StoreError::Database(sqlx::Error::RowNotFound)),
            StepError::Fatal(_)
        ));
    }
}
