//! Domain repository for the `messages` table.
//!
//! Ids are assigned by the store. Content is trimmed and must be non-empty;
//! ids must be positive. Every function runs on a caller-supplied
//! connection, normally a transaction owned by the step processor.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::error::StoreError;

/// One row of the `messages` table.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageRow {
    /// Store-assigned identifier.
    pub id: i64,
    /// Message content.
    pub content: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

fn validated_content(content: &str) -> Result<&str, StoreError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(StoreError::InvalidContent(
            "content must not be empty".into(),
        ));
    }
    Ok(trimmed)
}

fn validated_id(id: i64) -> Result<i64, StoreError> {
    if id <= 0 {
        return Err(StoreError::InvalidContent(format!(
            "id must be positive, got {id}"
        )));
    }
    Ok(id)
}

/// Inserts a new message and returns the stored row.
///
/// # Errors
///
/// `InvalidContent` for empty/whitespace content; `Database` otherwise.
pub async fn create(conn: &mut PgConnection, content: &str) -> Result<MessageRow, StoreError> {
    let content = validated_content(content)?;
    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (content) VALUES ($1)
         RETURNING id, content, created_at, updated_at",
    )
    .bind(content)
    .fetch_one(conn)
    .await?;
    Ok(row)
}

/// Fetches a message by id.
///
/// # Errors
///
/// `InvalidContent` for non-positive ids, `NotFound` for absent rows.
pub async fn read(conn: &mut PgConnection, id: i64) -> Result<MessageRow, StoreError> {
    let id = validated_id(id)?;
    sqlx::query_as::<_, MessageRow>(
        "SELECT id, content, created_at, updated_at FROM messages WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound(id))
}

/// Replaces the content of an existing message and returns the updated row.
///
/// # Errors
///
/// `InvalidContent` for bad input, `NotFound` for absent rows.
pub async fn update(
    conn: &mut PgConnection,
    id: i64,
    content: &str,
) -> Result<MessageRow, StoreError> {
    let id = validated_id(id)?;
    let content = validated_content(content)?;
    sqlx::query_as::<_, MessageRow>(
        "UPDATE messages SET content = $2, updated_at = NOW() WHERE id = $1
         RETURNING id, content, created_at, updated_at",
    )
    .bind(id)
    .bind(content)
    .fetch_optional(conn)
    .await?
    .ok_or(StoreError::NotFound(id))
}

/// Deletes a message by id.
///
/// # Errors
///
/// `InvalidContent` for non-positive ids, `NotFound` when no row was deleted.
pub async fn delete(conn: &mut PgConnection, id: i64) -> Result<(), StoreError> {
    let id = validated_id(id)?;
    let result = sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}
