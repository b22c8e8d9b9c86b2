use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use jobscout_core::error::AppError;
use jobscout_core::organization::{PostingLink, ScrapeHistoryRecord};
use jobscout_core::traits::HistoryStore;

/// Repository for per (organization, user) scrape history.
///
/// Each record holds the full link set seen at the last visit as JSONB;
/// `record` always overwrites it so new-link detection compares against
/// the most recent scrape.
#[derive(Clone)]
pub struct ScrapeHistoryRepository {
    pool: Pool<Postgres>,
}

impl ScrapeHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct HistoryRow {
    organization_id: Uuid,
    user_id: Uuid,
    last_scrape_date: DateTime<Utc>,
    links: serde_json::Value,
}

impl TryFrom<HistoryRow> for ScrapeHistoryRecord {
    type Error = AppError;

    fn try_from(row: HistoryRow) -> Result<Self, AppError> {
        let links: Vec<PostingLink> = serde_json::from_value(row.links)?;
        Ok(ScrapeHistoryRecord {
            organization_id: row.organization_id,
            user_id: row.user_id,
            last_scrape_date: row.last_scrape_date,
            links,
        })
    }
}

impl HistoryStore for ScrapeHistoryRepository {
    async fn get_last(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ScrapeHistoryRecord>, AppError> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT organization_id, user_id, last_scrape_date, links
            FROM scrape_history
            WHERE organization_id = $1 AND user_id = $2
            "#,
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn record(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        links: &[PostingLink],
    ) -> Result<(), AppError> {
        let links_json = serde_json::to_value(links)?;
        sqlx::query(
            r#"
            INSERT INTO scrape_history (organization_id, user_id, last_scrape_date, links)
            VALUES ($1, $2, NOW(), $3)
            ON CONFLICT (organization_id, user_id)
            DO UPDATE SET last_scrape_date = NOW(), links = EXCLUDED.links
            "#,
        )
        .bind(organization_id)
        .bind(user_id)
        .bind(links_json)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
