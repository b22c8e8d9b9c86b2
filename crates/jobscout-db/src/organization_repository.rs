use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use jobscout_core::error::AppError;
use jobscout_core::organization::TrackedOrganization;
use jobscout_core::traits::OrganizationStore;

/// Repository for tracked-organization records.
#[derive(Clone)]
pub struct OrganizationRepository {
    pool: Pool<Postgres>,
}

/// Fields for registering a new tracked organization.
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub careers_url: String,
    pub rank: i32,
}

impl OrganizationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new organization and return the stored record.
    pub async fn create(&self, org: &NewOrganization) -> Result<TrackedOrganization, AppError> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r#"
            INSERT INTO organizations (name, careers_url, rank)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&org.name)
        .bind(&org.careers_url)
        .bind(org.rank)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.into())
    }

    /// Stop tracking an organization without deleting its history.
    pub async fn set_tracking(&self, id: Uuid, is_tracking: bool) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE organizations SET is_tracking = $2, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(id)
        .bind(is_tracking)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    careers_url: String,
    rank: i32,
    last_successful_scrape_at: Option<DateTime<Utc>>,
    is_problematic: bool,
    is_tracking: bool,
}

impl From<OrganizationRow> for TrackedOrganization {
    fn from(row: OrganizationRow) -> Self {
        TrackedOrganization {
            id: row.id,
            name: row.name,
            careers_url: row.careers_url,
            rank: row.rank,
            last_successful_scrape_at: row.last_successful_scrape_at,
            is_problematic: row.is_problematic,
            is_tracking: row.is_tracking,
        }
    }
}

impl OrganizationStore for OrganizationRepository {
    async fn get(&self, id: Uuid) -> Result<Option<TrackedOrganization>, AppError> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r#"
            SELECT id, name, careers_url, rank, last_successful_scrape_at,
                   is_problematic, is_tracking
            FROM organizations WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list_tracking(&self) -> Result<Vec<TrackedOrganization>, AppError> {
        let rows = sqlx::query_as::<_, OrganizationRow>(
            r#"
            SELECT id, name, careers_url, rank, last_successful_scrape_at,
                   is_problematic, is_tracking
            FROM organizations
            WHERE is_tracking
            ORDER BY rank DESC, name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_scraped(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE organizations
            SET last_successful_scrape_at = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_problematic(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE organizations SET is_problematic = TRUE, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
