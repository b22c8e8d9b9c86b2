use async_trait::async_trait;

use crate::error::AppError;
use crate::matching;
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::traits::{LlmClient, UsageOperation, UsageSink};
use crate::usage;

/// Sends all newly-seen links plus the CV and candidate profile to the
/// inference service for a shortlist of plausibly-relevant postings.
///
/// An empty link set yields an empty shortlist without calling the
/// service. Transient service failures degrade to an empty shortlist
/// rather than aborting the run; a malformed response is a stage
/// failure.
pub struct InitialMatchStage<L: LlmClient, U: UsageSink> {
    llm: L,
    usage_sink: U,
}

impl<L: LlmClient, U: UsageSink> InitialMatchStage<L, U> {
    pub fn new(llm: L, usage_sink: U) -> Self {
        Self { llm, usage_sink }
    }
}

#[async_trait]
impl<L: LlmClient, U: UsageSink> PipelineStage for InitialMatchStage<L, U> {
    fn name(&self) -> &'static str {
        "InitialMatch"
    }

    fn description(&self) -> &'static str {
        "Shortlists plausibly-relevant postings via the inference service"
    }

    fn can_skip(&self, ctx: &PipelineContext) -> bool {
        matches!(&ctx.matched_jobs, Some(jobs) if !jobs.is_empty())
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<(), AppError> {
        if ctx.cv_content.as_deref().is_none_or(str::is_empty) {
            return Err(AppError::Validation(
                "CV content is required for initial matching".into(),
            ));
        }
        if ctx.candidate_profile.is_none() {
            return Err(AppError::Validation(
                "Candidate profile is required for initial matching".into(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), AppError> {
        let links = ctx.all_new_links();
        if links.is_empty() {
            tracing::info!("No new links to match, shortlist is empty");
            ctx.matched_jobs = Some(Vec::new());
            return Ok(());
        }

        usage::check_daily_reset(&mut ctx.usage_stats);
        let limits = ctx.model_limits.clone();
        usage::check_rate_limits(&limits, &mut ctx.usage_stats).await;

        let prompt = matching::build_initial_match_prompt(
            &links,
            ctx.cv_content.as_deref().unwrap_or_default(),
            ctx.candidate_profile.as_ref().unwrap_or(&serde_json::Value::Null),
        );
        let schema = matching::initial_match_schema();

        tracing::info!(links = links.len(), "Requesting initial match shortlist");
        let shortlist = match self.llm.generate(&prompt, &schema).await {
            Ok(response) => {
                let event = ctx.record_usage(UsageOperation::InitialMatch, response.usage);
                if let Err(sink_err) = self.usage_sink.record(&event).await {
                    tracing::warn!(error = %sink_err, "Usage sink write failed, continuing");
                }
                matching::parse_initial_match_response(&response.json)?
            }
            // Transient service trouble degrades: nothing qualifies this
            // run. A malformed response still fails the stage.
            Err(error) if error.is_retryable() => {
                tracing::error!(error = %error, "Initial matching failed, degrading to empty shortlist");
                Vec::new()
            }
            Err(error) => return Err(error),
        };

        tracing::info!(
            matched = shortlist.len(),
            analyzed = links.len(),
            "Initial matching completed"
        );
        ctx.matched_jobs = Some(shortlist);
        Ok(())
    }

    async fn on_error(&self, error: &AppError, ctx: &mut PipelineContext) {
        tracing::error!(
            error = %error,
            available_links = ctx.all_new_links().len(),
            cv_chars = ctx.cv_content.as_deref().map_or(0, str::len),
            has_profile = ctx.candidate_profile.is_some(),
            "Initial match stage failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organization::PostingLink;
    use crate::testutil::{MockLlmClient, MockUsageSink, make_ready_context};
    use crate::traits::{LlmResponse, TokenUsage};
    use serde_json::json;

    fn shortlist_response(jobs: &[(&str, &str)]) -> LlmResponse {
        LlmResponse {
            json: json!({
                "recommendedPositions": jobs
                    .iter()
                    .map(|(title, url)| json!({"title": title, "url": url}))
                    .collect::<Vec<_>>()
            }),
            usage: TokenUsage {
                prompt_tokens: 100,
                output_tokens: 20,
                total_tokens: 120,
            },
        }
    }

    #[tokio::test]
    async fn empty_input_skips_the_service_entirely() {
        let llm = MockLlmClient::new(vec![]);
        let stage = InitialMatchStage::new(llm.clone(), MockUsageSink::new());
        let mut ctx = make_ready_context(&[]);

        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.matched_jobs.as_deref(), Some(&[][..]));
        assert_eq!(llm.call_count(), 0);
        assert_eq!(ctx.usage_stats.calls, 0);
    }

    #[tokio::test]
    async fn shortlist_is_parsed_and_usage_recorded() {
        let llm = MockLlmClient::new(vec![Ok(shortlist_response(&[(
            "Backend Engineer",
            "https://x.example/jobs/1",
        )]))]);
        let sink = MockUsageSink::new();
        let stage = InitialMatchStage::new(llm.clone(), sink.clone());
        let mut ctx = make_ready_context(&[PostingLink::new(
            "https://x.example/jobs/1",
            "Backend Engineer",
        )]);

        stage.execute(&mut ctx).await.unwrap();

        let jobs = ctx.matched_jobs.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].url, "https://x.example/jobs/1");
        assert_eq!(ctx.usage_stats.total_tokens, 120);
        assert_eq!(ctx.usage_stats.calls, 1);
        assert_eq!(sink.events().len(), 1);
    }

    #[tokio::test]
    async fn inference_failure_degrades_to_empty_shortlist() {
        let llm = MockLlmClient::new(vec![Err(AppError::Inference {
            message: "overloaded".into(),
            status_code: 503,
            retryable: true,
        })]);
        let stage = InitialMatchStage::new(llm, MockUsageSink::new());
        let mut ctx = make_ready_context(&[PostingLink::new("https://x.example/jobs/1", "Backend")]);

        stage.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.matched_jobs.as_deref(), Some(&[][..]));
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_the_stage() {
        let llm = MockLlmClient::new(vec![Ok(shortlist_response(&[]))]);
        let sink = MockUsageSink::failing();
        let stage = InitialMatchStage::new(llm, sink);
        let mut ctx = make_ready_context(&[PostingLink::new("https://x.example/jobs/1", "Backend")]);

        stage.execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.matched_jobs.as_deref(), Some(&[][..]));
    }

    #[tokio::test]
    async fn missing_cv_fails_validation() {
        let stage = InitialMatchStage::new(MockLlmClient::new(vec![]), MockUsageSink::new());
        let mut ctx = make_ready_context(&[]);
        ctx.cv_content = None;
        assert!(matches!(stage.validate(&ctx), Err(AppError::Validation(_))));
    }
}
