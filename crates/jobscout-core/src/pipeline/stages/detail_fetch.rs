use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::traits::PageFetcher;

/// Retry schedule for per-URL detail fetches: exponential backoff from
/// `base_delay`, capped at `max_backoff`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry `attempt` (1-indexed: the wait after the
    /// attempt with that number failed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Fetches full page content for every shortlisted URL. URLs that
/// exhaust their retries are simply absent from the content map.
pub struct DetailFetchStage<F: PageFetcher> {
    fetcher: F,
    retry: RetryPolicy,
}

impl<F: PageFetcher> DetailFetchStage<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_with_retries(&self, url: &str) -> Option<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetcher.fetch(url).await {
                Ok(page) => return Some(page.content),
                Err(error) if attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff_for(attempt);
                    tracing::warn!(
                        url,
                        attempt,
                        max = self.retry.max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Detail fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => {
                    tracing::error!(
                        url,
                        attempts = attempt,
                        error = %error,
                        "Detail fetch exhausted retries"
                    );
                    return None;
                }
            }
        }
    }
}

#[async_trait]
impl<F: PageFetcher> PipelineStage for DetailFetchStage<F> {
    fn name(&self) -> &'static str {
        "DetailFetch"
    }

    fn description(&self) -> &'static str {
        "Fetches full page content for shortlisted postings"
    }

    fn can_skip(&self, ctx: &PipelineContext) -> bool {
        !ctx.job_details.is_empty()
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<(), AppError> {
        let Some(jobs) = &ctx.matched_jobs else {
            return Err(AppError::Validation(
                "Matched jobs are required for detail fetching".into(),
            ));
        };
        for job in jobs {
            if job.url.trim().is_empty() {
                return Err(AppError::Validation(format!(
                    "Shortlisted job '{}' has no URL",
                    job.title
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), AppError> {
        let urls: Vec<String> = ctx
            .matched_jobs
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|job| job.url.clone())
            .collect();

        if urls.is_empty() {
            tracing::info!("No shortlisted jobs, skipping detail fetch");
            return Ok(());
        }

        tracing::info!(count = urls.len(), "Fetching posting details");
        let fetches = urls.iter().map(|url| async {
            let content = self.fetch_with_retries(url).await;
            (url.clone(), content)
        });
        let results = futures::future::join_all(fetches).await;

        let mut fetched = 0usize;
        for (url, content) in results {
            if let Some(content) = content {
                ctx.job_details.insert(url, content);
                fetched += 1;
            }
        }

        tracing::info!(
            fetched,
            failed = urls.len() - fetched,
            "Detail fetch completed"
        );
        Ok(())
    }

    async fn on_error(&self, error: &AppError, ctx: &mut PipelineContext) {
        tracing::error!(
            error = %error,
            shortlisted = ctx.matched_jobs.as_deref().map_or(0, <[_]>::len),
            "Detail fetch stage failed"
        );
    }
}
