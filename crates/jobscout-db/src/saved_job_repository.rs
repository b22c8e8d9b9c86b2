use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use jobscout_core::error::AppError;
use jobscout_core::organization::{AnalysisResult, NewSavedJob, SavedJob};
use jobscout_core::traits::SavedJobStore;

/// Repository for persisted job matches.
#[derive(Clone)]
pub struct SavedJobRepository {
    pool: Pool<Postgres>,
}

impl SavedJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct SavedJobRow {
    id: Uuid,
    user_id: Uuid,
    organization_id: Uuid,
    title: String,
    url: String,
    suitability_score: i32,
    analysis: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<SavedJobRow> for SavedJob {
    type Error = AppError;

    fn try_from(row: SavedJobRow) -> Result<Self, AppError> {
        let analysis: AnalysisResult = serde_json::from_value(row.analysis)?;
        Ok(SavedJob {
            id: row.id,
            user_id: row.user_id,
            organization_id: row.organization_id,
            title: row.title,
            url: row.url,
            suitability_score: row.suitability_score,
            analysis,
            created_at: row.created_at,
        })
    }
}

impl SavedJobStore for SavedJobRepository {
    async fn exists(&self, user_id: Uuid, url: &str, title: &str) -> Result<bool, AppError> {
        // Same URL is a duplicate regardless of title; the title match
        // only matters when a posting moved to a new URL unchanged.
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM saved_jobs
                WHERE user_id = $1 AND (url = $2 OR (url = $2 AND title = $3))
            )
            "#,
        )
        .bind(user_id)
        .bind(url)
        .bind(title)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(exists)
    }

    async fn save(&self, job: &NewSavedJob) -> Result<Uuid, AppError> {
        let analysis = serde_json::to_value(&job.analysis)?;
        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO saved_jobs (user_id, organization_id, title, url, suitability_score, analysis)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(job.user_id)
        .bind(job.organization_id)
        .bind(&job.title)
        .bind(&job.url)
        .bind(job.suitability_score)
        .bind(analysis)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(id)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SavedJob>, AppError> {
        let rows = sqlx::query_as::<_, SavedJobRow>(
            r#"
            SELECT id, user_id, organization_id, title, url, suitability_score, analysis, created_at
            FROM saved_jobs
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
