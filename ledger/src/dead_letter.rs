//! Dead letter queue for events that exhausted their retries.
//!
//! Persistent storage for donations the settlement service could not process
//! after its retry budget. Nothing is silently dropped: every dead-lettered
//! event stays queryable for operator inspection and manual replay.

use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

/// Status of a failed event in the dead letter queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DlqStatus {
    /// Event is pending investigation or reprocessing.
    Pending,
    /// Event is currently being reprocessed.
    Processing,
    /// Event was successfully reprocessed.
    Resolved,
    /// Event was permanently discarded.
    Discarded,
}

impl DlqStatus {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse from the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::CorruptRow`] for unknown status strings.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(LedgerError::CorruptRow(format!("invalid DLQ status: {s}"))),
        }
    }
}

/// An entry in the dead letter queue: the failed event plus failure metadata.
#[derive(Debug, Clone)]
pub struct FailedEvent {
    /// Unique identifier for this entry.
    pub id: i64,
    /// Topic the event arrived on.
    pub topic: String,
    /// Partition key of the event, if it had one.
    pub event_key: Option<String>,
    /// `event-type` header of the event, if it had one.
    pub event_type: Option<String>,
    /// The event payload as it arrived.
    pub payload: serde_json::Value,
    /// Error message from the final failure.
    pub error_message: String,
    /// Full error details (debug output).
    pub error_details: Option<String>,
    /// Number of processing attempts before giving up.
    pub retry_count: i32,
    /// When this event first failed.
    pub first_failed_at: DateTime<Utc>,
    /// When this event most recently failed.
    pub last_failed_at: DateTime<Utc>,
    /// Current status.
    pub status: DlqStatus,
    /// When the failure was resolved, if it was.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who or what resolved it.
    pub resolved_by: Option<String>,
    /// Notes about the resolution.
    pub resolution_notes: Option<String>,
}

/// PostgreSQL-backed dead letter queue.
///
/// Shares the ledger's pool so a dead-letter insert needs no extra
/// connection management.
///
/// # Example
///
/// ```no_run
/// use fundflow_ledger::{DeadLetterQueue, DlqStatus};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
/// let pending = dlq.list_pending(100).await?;
/// if let Some(first) = pending.first() {
///     dlq.update_status(first.id, DlqStatus::Processing).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a dead letter queue on the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add a failed event.
    ///
    /// Returns the id of the created entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the insert fails.
    pub async fn add_entry(
        &self,
        topic: &str,
        event_key: Option<&str>,
        event_type: Option<&str>,
        payload: &serde_json::Value,
        error_message: &str,
        error_details: Option<&str>,
        retry_count: i32,
    ) -> Result<i64> {
        let id: (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_events (
                topic, event_key, event_type, payload,
                error_message, error_details, retry_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(topic)
        .bind(event_key)
        .bind(event_type)
        .bind(payload)
        .bind(error_message)
        .bind(error_details)
        .bind(retry_count)
        .fetch_one(&self.pool)
        .await?;

        tracing::warn!(
            dlq_id = id.0,
            topic = topic,
            event_key = event_key.unwrap_or(""),
            error = error_message,
            retry_count = retry_count,
            "Event added to dead letter queue"
        );

        metrics::counter!("ledger.dlq.added", "topic" => topic.to_string()).increment(1);

        Ok(id.0)
    }

    /// List pending failed events, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedEvent>> {
        self.list_by_status(DlqStatus::Pending, limit).await
    }

    /// List failed events by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn list_by_status(&self, status: DlqStatus, limit: usize) -> Result<Vec<FailedEvent>> {
        #[allow(clippy::cast_possible_wrap)] // Limit is reasonable size, i64 is safe
        let rows = sqlx::query(
            r"
            SELECT
                id, topic, event_key, event_type, payload,
                error_message, error_details, retry_count,
                first_failed_at, last_failed_at, status,
                resolved_at, resolved_by, resolution_notes
            FROM failed_events
            WHERE status = $1
            ORDER BY first_failed_at ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_failed_event).collect()
    }

    /// Update the status of an entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the update fails.
    pub async fn update_status(&self, id: i64, status: DlqStatus) -> Result<()> {
        sqlx::query(
            r"
            UPDATE failed_events
            SET status = $1, last_failed_at = now()
            WHERE id = $2
            ",
        )
        .bind(status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;

        tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");

        Ok(())
    }

    /// Mark an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, resolved_by: &str, notes: Option<&str>) -> Result<()> {
        sqlx::query(
            r"
            UPDATE failed_events
            SET status = 'resolved',
                resolved_at = now(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        tracing::info!(dlq_id = id, resolved_by = resolved_by, "DLQ entry resolved");
        metrics::counter!("ledger.dlq.resolved").increment(1);

        Ok(())
    }

    /// Mark an entry permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE failed_events
            SET status = 'discarded',
                resolved_at = now(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;

        tracing::warn!(dlq_id = id, reason = reason, "DLQ entry discarded");
        metrics::counter!("ledger.dlq.discarded").increment(1);

        Ok(())
    }

    /// Count pending failures; useful for health checks.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM failed_events WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Convert a database row to a [`FailedEvent`].
    fn row_to_failed_event(row: &sqlx::postgres::PgRow) -> Result<FailedEvent> {
        let status_str: String = row.try_get("status")?;
        let status = DlqStatus::parse(&status_str)?;

        Ok(FailedEvent {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            event_key: row.try_get("event_key")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            error_message: row.try_get("error_message")?,
            error_details: row.try_get("error_details")?,
            retry_count: row.try_get("retry_count")?,
            first_failed_at: row.try_get("first_failed_at")?,
            last_failed_at: row.try_get("last_failed_at")?,
            status,
            resolved_at: row.try_get("resolved_at")?,
            resolved_by: row.try_get("resolved_by")?,
            resolution_notes: row.try_get("resolution_notes")?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dlq_status_roundtrip() {
        for status in &[
            DlqStatus::Pending,
            DlqStatus::Processing,
            DlqStatus::Resolved,
            DlqStatus::Discarded,
        ] {
            let s = status.as_str();
            let parsed = DlqStatus::parse(s).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(DlqStatus::parse("invalid").is_err());
    }
}
