use jobscout_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::history_repository::ScrapeHistoryRepository;
use crate::organization_repository::OrganizationRepository;
use crate::queue_repository::WorkQueueRepository;
use crate::saved_job_repository::SavedJobRepository;
use crate::usage_repository::TokenUsageRepository;

/// Central database facade — owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    pub fn organization_repo(&self) -> OrganizationRepository {
        OrganizationRepository::new(self.pool.clone())
    }

    pub fn queue_repo(&self) -> WorkQueueRepository {
        WorkQueueRepository::new(self.pool.clone())
    }

    pub fn history_repo(&self) -> ScrapeHistoryRepository {
        ScrapeHistoryRepository::new(self.pool.clone())
    }

    pub fn saved_job_repo(&self) -> SavedJobRepository {
        SavedJobRepository::new(self.pool.clone())
    }

    pub fn usage_repo(&self) -> TokenUsageRepository {
        TokenUsageRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
