//! Idempotency store.
//!
//! A persistent set of processed command keys with the last outcome. The
//! check inserts a provisional row inside the step's transaction, so a
//! rollback releases the key and a commit captures effect + key atomically;
//! `record_outcome` finalizes the status just before commit.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use sagaline_core::envelope::AckStatus;

use crate::error::StoreError;

/// One row of the `idempotency_keys` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IdempotencyRecord {
    /// The deduped key.
    pub idempotency_key: String,
    /// Outcome of the last completed processing (`PENDING` only while the
    /// owning transaction is still open).
    pub last_status: String,
    /// Trace that first processed the key.
    pub trace_id: String,
    /// Time the key was first claimed.
    pub processed_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// The recorded terminal status, if the key finished processing.
    #[must_use]
    pub fn status(&self) -> Option<AckStatus> {
        match self.last_status.as_str() {
            "SUCCESS" => Some(AckStatus::Success),
            "FAILURE" => Some(AckStatus::Failure),
            _ => None,
        }
    }
}

/// Returns the prior record for `key` if it was already processed, claiming
/// the key with a provisional `PENDING` row otherwise.
///
/// # Errors
///
/// `Database` on query failure; concurrent claims of the same key surface as
/// a unique-violation database error and are classified by the caller.
pub async fn check_and_mark(
    conn: &mut PgConnection,
    key: &str,
    trace_id: &str,
) -> Result<Option<IdempotencyRecord>, StoreError> {
    let existing = sqlx::query_as::<_, IdempotencyRecord>(
        "SELECT idempotency_key, last_status, trace_id, processed_at
         FROM idempotency_keys WHERE idempotency_key = $1",
    )
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(record) = existing {
        return Ok(Some(record));
    }

    sqlx::query(
        "INSERT INTO idempotency_keys (idempotency_key, last_status, trace_id)
         VALUES ($1, 'PENDING', $2)",
    )
    .bind(key)
    .bind(trace_id)
    .execute(conn)
    .await?;

    Ok(None)
}

/// Finalizes the outcome for a key claimed earlier in the same transaction.
///
/// # Errors
///
/// `Database` on query failure.
pub async fn record_outcome(
    conn: &mut PgConnection,
    key: &str,
    status: AckStatus,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE idempotency_keys SET last_status = $2, processed_at = NOW()
         WHERE idempotency_key = $1",
    )
    .bind(key)
    .bind(status.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: &str) -> IdempotencyRecord {
        IdempotencyRecord {
            idempotency_key: "k".into(),
            last_status: status.into(),
            trace_id: "t".into(),
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_parses_terminal_states() {
        assert_eq!(record("SUCCESS").status(), Some(AckStatus::Success));
        assert_eq!(record("FAILURE").status(), Some(AckStatus::Failure));
    }

    #[test]
    fn test_pending_has_no_terminal_status() {
        assert_eq!(record("PENDING").status(), None);
    }
}
