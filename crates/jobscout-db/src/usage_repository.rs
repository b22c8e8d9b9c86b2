use sqlx::{PgPool, Pool, Postgres};

use jobscout_core::error::AppError;
use jobscout_core::traits::{UsageEvent, UsageSink};

/// Append-only token-usage log for billing/observability.
///
/// Callers treat writes as best-effort: a failure here is logged and
/// swallowed at the call site, never aborting a pipeline run.
#[derive(Clone)]
pub struct TokenUsageRepository {
    pool: Pool<Postgres>,
}

impl TokenUsageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Total tokens and cost recorded for a user.
    pub async fn totals_for_user(
        &self,
        user_id: uuid::Uuid,
    ) -> Result<(i64, f64), AppError> {
        let (tokens, cost): (Option<i64>, Option<f64>) = sqlx::query_as(
            r#"
            SELECT SUM(total_tokens), SUM(cost_usd)
            FROM token_usage
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok((tokens.unwrap_or(0), cost.unwrap_or(0.0)))
    }
}

impl UsageSink for TokenUsageRepository {
    async fn record(&self, event: &UsageEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO token_usage
                (process_id, operation, prompt_tokens, output_tokens, total_tokens,
                 cost_usd, user_id, organization_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.process_id)
        .bind(event.operation.as_str())
        .bind(event.prompt_tokens as i64)
        .bind(event.output_tokens as i64)
        .bind(event.total_tokens as i64)
        .bind(event.cost_usd)
        .bind(event.user_id)
        .bind(event.organization_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
