//! Append-only saga audit log.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::error::StoreError;

/// Status recorded for one step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStatus {
    /// The step is in flight.
    Pending,
    /// The step applied its effect.
    Success,
    /// The step failed for a domain reason.
    Failure,
}

impl SagaStatus {
    /// DB name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

/// One row of the `saga_log` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SagaLogEntry {
    /// Row identifier.
    pub id: i64,
    /// Trace the step belongs to.
    pub trace_id: String,
    /// Step name, e.g. `CreateMessage`.
    pub step: String,
    /// Recorded status.
    pub status: String,
    /// Stable error code for failures.
    pub error_code: Option<String>,
    /// Free-form failure detail.
    pub detail: Option<String>,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

/// Appends one audit row. Runs inside the step's transaction, so the entry
/// commits iff the step outcome commits.
///
/// # Errors
///
/// `Database` on query failure.
pub async fn append(
    conn: &mut PgConnection,
    trace_id: &str,
    step: &str,
    status: SagaStatus,
    error_code: Option<&str>,
    detail: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO saga_log (trace_id, step, status, error_code, detail)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(trace_id)
    .bind(step)
    .bind(status.as_str())
    .bind(error_code)
    .bind(detail)
    .execute(conn)
    .await?;
    Ok(())
}

/// Returns the most recent audit row for a trace. Used to rebuild failure
/// acks when a duplicate delivery hits an already-processed key.
///
/// # Errors
///
/// `Database` on query failure.
pub async fn latest_for_trace(
    conn: &mut PgConnection,
    trace_id: &str,
) -> Result<Option<SagaLogEntry>, StoreError> {
    let entry = sqlx::query_as::<_, SagaLogEntry>(
        "SELECT id, trace_id, step, status, error_code, detail, created_at
         FROM saga_log WHERE trace_id = $1
         ORDER BY id DESC LIMIT 1",
    )
    .bind(trace_id)
    .fetch_optional(conn)
    .await?;
    Ok(entry)
}

/// Returns all audit rows for a trace in append order.
///
/// # Errors
///
/// `Database` on query failure.
pub async fn entries_for_trace(
    conn: &mut PgConnection,
    trace_id: &str,
) -> Result<Vec<SagaLogEntry>, StoreError> {
    let entries = sqlx::query_as::<_, SagaLogEntry>(
        "SELECT id, trace_id, step, status, error_code, detail, created_at
         FROM saga_log WHERE trace_id = $1
         ORDER BY id ASC",
    )
    .bind(trace_id)
    .fetch_all(conn)
    .await?;
    Ok(entries)
}
