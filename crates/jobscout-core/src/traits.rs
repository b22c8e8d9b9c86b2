use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::organization::{NewSavedJob, PostingLink, SavedJob, ScrapeHistoryRecord, TrackedOrganization};

/// A fetched page: best-effort full-page text plus the links found on it.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub content: String,
    pub links: Vec<PostingLink>,
}

/// Fetches a page and extracts its text content and links.
///
/// Pagination/infinite-scroll handling (if any) is internal to the
/// implementation; callers treat the result as opaque best-effort.
pub trait PageFetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;
}

/// Extracts plain text from a document reference (e.g. a CV share link).
pub trait DocumentTextExtractor: Send + Sync + Clone {
    fn extract_text(&self, file_ref: &str) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Token counts reported by the inference service for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// A schema-constrained inference response: parsed JSON plus token counts.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub json: serde_json::Value,
    pub usage: TokenUsage,
}

/// Schema-constrained JSON generation against an external model.
pub trait LlmClient: Send + Sync + Clone {
    fn generate(
        &self,
        prompt: &str,
        response_schema: &serde_json::Value,
    ) -> impl Future<Output = Result<LlmResponse, AppError>> + Send;
}

/// Read/write access to tracked-organization records.
pub trait OrganizationStore: Send + Sync + Clone {
    fn get(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<TrackedOrganization>, AppError>> + Send;

    fn list_tracking(
        &self,
    ) -> impl Future<Output = Result<Vec<TrackedOrganization>, AppError>> + Send;

    fn mark_scraped(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn mark_problematic(&self, id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Per (organization, user) record of previously seen posting links.
pub trait HistoryStore: Send + Sync + Clone {
    fn get_last(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Option<ScrapeHistoryRecord>, AppError>> + Send;

    /// Upsert: always overwrite with the latest full link set and stamp
    /// the scrape time.
    fn record(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        links: &[PostingLink],
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Links in `current` whose URL was not present in the prior record.
///
/// With no prior record everything is new. Title/context changes on an
/// already-seen URL do not count.
pub fn find_new_links(
    previous: Option<&ScrapeHistoryRecord>,
    current: &[PostingLink],
) -> Vec<PostingLink> {
    match previous {
        None => current.to_vec(),
        Some(record) => {
            let seen: std::collections::HashSet<&str> =
                record.links.iter().map(|l| l.url.as_str()).collect();
            current
                .iter()
                .filter(|l| !seen.contains(l.url.as_str()))
                .cloned()
                .collect()
        }
    }
}

/// Persists qualified job matches for a user.
pub trait SavedJobStore: Send + Sync + Clone {
    /// True when the user already has this job saved (same URL, or same
    /// URL + title). Duplicate detection is an expected skip, not an
    /// error.
    fn exists(
        &self,
        user_id: Uuid,
        url: &str,
        title: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn save(&self, job: &NewSavedJob) -> impl Future<Output = Result<Uuid, AppError>> + Send;

    fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Vec<SavedJob>, AppError>> + Send;
}

/// One entry for the append-only token-usage log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UsageEvent {
    pub process_id: Uuid,
    pub operation: UsageOperation,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
}

/// Which pipeline call produced a usage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOperation {
    InitialMatch,
    DeepAnalysis,
    CvExtraction,
}

impl UsageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageOperation::InitialMatch => "initial_match",
            UsageOperation::DeepAnalysis => "deep_analysis",
            UsageOperation::CvExtraction => "cv_extraction",
        }
    }
}

/// Billing/observability sink. Best-effort: callers log and swallow its
/// failures rather than aborting the pipeline.
pub trait UsageSink: Send + Sync + Clone {
    fn record(&self, event: &UsageEvent) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op UsageSink for when usage logging is not configured.
#[derive(Debug, Clone)]
pub struct NullUsageSink;

impl UsageSink for NullUsageSink {
    async fn record(&self, _event: &UsageEvent) -> Result<(), AppError> {
        Ok(())
    }
}
