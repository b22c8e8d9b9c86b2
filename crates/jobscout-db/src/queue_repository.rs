use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use jobscout_core::error::AppError;
use jobscout_core::queue::{QueueEntry, QueueStatus};
use jobscout_core::work_queue::WorkQueue;

/// PostgreSQL-backed work queue using `SELECT FOR UPDATE SKIP LOCKED`
/// for atomic claiming. A partial unique index enforces at most one
/// pending/processing entry per organization.
#[derive(Clone)]
pub struct WorkQueueRepository {
    pool: Pool<Postgres>,
}

impl WorkQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    organization_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_attempt_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    retry_count: i32,
}

impl From<QueueRow> for QueueEntry {
    fn from(row: QueueRow) -> Self {
        QueueEntry {
            id: row.id,
            organization_id: row.organization_id,
            status: row.status.parse().unwrap_or(QueueStatus::Pending),
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_attempt_at: row.last_attempt_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
            retry_count: row.retry_count.max(0) as u32,
        }
    }
}

fn cutoff_for(threshold: Duration) -> DateTime<Utc> {
    Utc::now() - TimeDelta::from_std(threshold).unwrap_or_else(|_| TimeDelta::minutes(30))
}

impl WorkQueue for WorkQueueRepository {
    async fn enqueue(&self, organization_id: Uuid) -> Result<Option<QueueEntry>, AppError> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            INSERT INTO work_queue (organization_id, status)
            VALUES ($1, 'pending')
            ON CONFLICT (organization_id) WHERE status IN ('pending', 'processing')
            DO NOTHING
            RETURNING *
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn claim_next(&self) -> Result<Option<QueueEntry>, AppError> {
        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE work_queue
            SET status = 'processing', last_attempt_at = NOW(), updated_at = NOW()
            WHERE id = (
                SELECT id FROM work_queue
                WHERE status = 'pending'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn complete(&self, entry_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE work_queue
            SET status = 'completed', completed_at = NOW(), updated_at = NOW(),
                error_message = NULL
            WHERE id = $1
            "#,
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    async fn fail(
        &self,
        entry_id: Uuid,
        error: &str,
        max_failures: u32,
    ) -> Result<QueueEntry, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            UPDATE work_queue
            SET status = 'failed', retry_count = retry_count + 1,
                error_message = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(entry_id)
        .bind(error)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        // Failures since the organization's last success; a successful
        // scrape resets the clock.
        let (failures,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM work_queue w
            JOIN organizations o ON o.id = w.organization_id
            WHERE w.organization_id = $1
              AND w.status = 'failed'
              AND (o.last_successful_scrape_at IS NULL
                   OR w.updated_at > o.last_successful_scrape_at)
            "#,
        )
        .bind(row.organization_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if failures >= i64::from(max_failures) {
            sqlx::query(
                r#"UPDATE organizations SET is_problematic = TRUE, updated_at = NOW() WHERE id = $1"#,
            )
            .bind(row.organization_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
            tracing::warn!(
                organization_id = %row.organization_id,
                failures,
                "Organization flagged problematic after repeated failures"
            );
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.into())
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<QueueEntry>, AppError> {
        let row = sqlx::query_as::<_, QueueRow>(r#"SELECT * FROM work_queue WHERE id = $1"#)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn count_by_status(&self, status: QueueStatus) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM work_queue WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(count)
    }

    async fn list_stuck(&self, threshold: Duration) -> Result<Vec<QueueEntry>, AppError> {
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT * FROM work_queue
            WHERE status = 'processing' AND last_attempt_at < $1
            ORDER BY last_attempt_at ASC
            "#,
        )
        .bind(cutoff_for(threshold))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn reset_stuck(&self, threshold: Duration) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE work_queue
            SET status = 'pending', updated_at = NOW()
            WHERE status = 'processing' AND last_attempt_at < $1
            "#,
        )
        .bind(cutoff_for(threshold))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
