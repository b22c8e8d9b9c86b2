use async_trait::async_trait;

use crate::batch::create_batches;
use crate::error::AppError;
use crate::matching::{self, JobForAnalysis};
use crate::organization::AnalysisResult;
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::traits::{LlmClient, UsageOperation, UsageSink};
use crate::usage;

pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Runs the shortlisted postings (those with fetched content) through
/// detailed scoring, in fixed-size batches.
///
/// Batches are strictly sequential: each batch's token usage is recorded
/// before the next call so quota checks see accurate counters. A failed
/// batch is logged and dropped; the remaining batches still run.
pub struct DeepAnalysisStage<L: LlmClient, U: UsageSink> {
    llm: L,
    usage_sink: U,
    batch_size: usize,
}

impl<L: LlmClient, U: UsageSink> DeepAnalysisStage<L, U> {
    pub fn new(llm: L, usage_sink: U) -> Self {
        Self {
            llm,
            usage_sink,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Shortlisted jobs that actually have fetched content.
    fn jobs_with_content(ctx: &PipelineContext) -> Vec<JobForAnalysis> {
        ctx.matched_jobs
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|job| {
                ctx.job_details.get(&job.url).map(|content| JobForAnalysis {
                    title: job.title.clone(),
                    url: job.url.clone(),
                    content: content.clone(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl<L: LlmClient, U: UsageSink> PipelineStage for DeepAnalysisStage<L, U> {
    fn name(&self) -> &'static str {
        "DeepAnalysis"
    }

    fn description(&self) -> &'static str {
        "Scores shortlisted postings in sequential batches"
    }

    fn can_skip(&self, ctx: &PipelineContext) -> bool {
        !ctx.analysis_results.is_empty()
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<(), AppError> {
        if ctx.cv_content.as_deref().is_none_or(str::is_empty) {
            return Err(AppError::Validation(
                "CV content is required for deep analysis".into(),
            ));
        }
        if ctx.candidate_profile.is_none() {
            return Err(AppError::Validation(
                "Candidate profile is required for deep analysis".into(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), AppError> {
        let jobs = Self::jobs_with_content(ctx);
        if jobs.is_empty() {
            tracing::info!("No jobs with content to analyze");
            return Ok(());
        }

        let batches = create_batches(&jobs, self.batch_size);
        tracing::info!(
            jobs = jobs.len(),
            batches = batches.len(),
            "Starting deep analysis"
        );

        let schema = matching::deep_analysis_schema();
        let limits = ctx.model_limits.clone();
        let mut all_results: Vec<AnalysisResult> = Vec::new();

        for (index, batch) in batches.iter().enumerate() {
            usage::check_daily_reset(&mut ctx.usage_stats);
            usage::check_rate_limits(&limits, &mut ctx.usage_stats).await;

            tracing::info!(
                batch = index + 1,
                of = batches.len(),
                size = batch.len(),
                "Analyzing batch"
            );

            let prompt = matching::build_deep_analysis_prompt(
                batch,
                ctx.cv_content.as_deref().unwrap_or_default(),
                ctx.candidate_profile.as_ref().unwrap_or(&serde_json::Value::Null),
            );

            match self.llm.generate(&prompt, &schema).await {
                Ok(response) => {
                    // Attribute the batch's cost to the organization of
                    // its first job; record before the next batch runs.
                    let batch_org = batch
                        .first()
                        .and_then(|job| ctx.organization_for_url(&job.url));
                    ctx.current_organization = batch_org;
                    let event = ctx.record_usage(UsageOperation::DeepAnalysis, response.usage);
                    if let Err(sink_err) = self.usage_sink.record(&event).await {
                        tracing::warn!(error = %sink_err, "Usage sink write failed, continuing");
                    }

                    match matching::parse_deep_analysis_response(&response.json) {
                        Ok(results) => all_results.extend(results),
                        Err(error) => {
                            tracing::error!(
                                batch = index + 1,
                                error = %error,
                                "Unparseable batch response, dropping batch"
                            );
                        }
                    }
                }
                Err(error) => {
                    tracing::error!(
                        batch = index + 1,
                        error = %error,
                        "Batch analysis failed, dropping batch"
                    );
                }
            }
        }

        let analyzed = all_results.len();
        all_results.retain(|r| r.suitability_score > 0);
        all_results.sort_by(|a, b| b.suitability_score.cmp(&a.suitability_score));

        tracing::info!(
            analyzed,
            accepted = all_results.len(),
            rejected = analyzed - all_results.len(),
            "Deep analysis completed"
        );

        for result in all_results {
            let Some(org_id) = ctx.organization_for_url(&result.url) else {
                tracing::warn!(url = %result.url, "Analysis result has no owning organization");
                continue;
            };
            ctx.analysis_results.entry(org_id).or_default().push(result);
        }

        Ok(())
    }

    async fn on_error(&self, error: &AppError, ctx: &mut PipelineContext) {
        tracing::error!(
            error = %error,
            shortlisted = ctx.matched_jobs.as_deref().map_or(0, <[_]>::len),
            with_content = ctx.job_details.len(),
            "Deep analysis stage failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organization::{MatchedJob, PostingLink};
    use crate::testutil::{MockLlmClient, MockUsageSink, make_ready_context};
    use crate::traits::{LlmResponse, TokenUsage};
    use serde_json::json;

    fn analysis_json(url: &str, score: i32) -> serde_json::Value {
        json!({
            "title": format!("Job {url}"),
            "url": url,
            "goodFitReasons": ["fits"],
            "considerationPoints": [],
            "stretchGoals": [],
            "suitabilityScore": score
        })
    }

    fn batch_response(entries: &[serde_json::Value]) -> LlmResponse {
        LlmResponse {
            json: json!({"analysisResults": entries}),
            usage: TokenUsage {
                prompt_tokens: 500,
                output_tokens: 100,
                total_tokens: 600,
            },
        }
    }

    /// Context with `n` shortlisted jobs (content included) for one org.
    fn context_with_jobs(n: usize) -> crate::pipeline::PipelineContext {
        let links: Vec<PostingLink> = (0..n)
            .map(|i| PostingLink::new(format!("https://x.example/jobs/{i}"), format!("Job {i}")))
            .collect();
        let mut ctx = make_ready_context(&links);
        ctx.matched_jobs = Some(
            links
                .iter()
                .map(|l| MatchedJob {
                    title: l.text.clone(),
                    url: l.url.clone(),
                })
                .collect(),
        );
        for link in &links {
            ctx.job_details.insert(link.url.clone(), "posting body".into());
        }
        ctx
    }

    #[tokio::test]
    async fn twelve_jobs_run_as_three_batches_with_usage_recorded_each() {
        let responses: Vec<Result<LlmResponse, AppError>> = (0..3)
            .map(|_| Ok(batch_response(&[analysis_json("https://x.example/jobs/0", 70)])))
            .collect();
        let llm = MockLlmClient::new(responses);
        let sink = MockUsageSink::new();
        let stage = DeepAnalysisStage::new(llm.clone(), sink.clone());
        let mut ctx = context_with_jobs(12);

        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(llm.call_count(), 3);
        assert_eq!(ctx.usage_stats.calls, 3);
        assert_eq!(sink.events().len(), 3);
        // Batch sizes visible through the prompts: 5, 5, 2 jobs.
        let prompts = llm.prompts();
        assert_eq!(prompts[0].matches("<Job>").count(), 5);
        assert_eq!(prompts[1].matches("<Job>").count(), 5);
        assert_eq!(prompts[2].matches("<Job>").count(), 2);
    }

    #[tokio::test]
    async fn zero_scores_are_dropped_and_results_sorted_descending() {
        let llm = MockLlmClient::new(vec![Ok(batch_response(&[
            analysis_json("https://x.example/jobs/0", 40),
            analysis_json("https://x.example/jobs/1", 0),
            analysis_json("https://x.example/jobs/2", 90),
        ]))]);
        let stage = DeepAnalysisStage::new(llm, MockUsageSink::new());
        let mut ctx = context_with_jobs(3);

        stage.execute(&mut ctx).await.unwrap();

        let org_id = ctx.organizations[0].id;
        let results = &ctx.analysis_results[&org_id];
        let scores: Vec<i32> = results.iter().map(|r| r.suitability_score).collect();
        assert_eq!(scores, vec![90, 40]);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped_but_others_survive() {
        let llm = MockLlmClient::new(vec![
            Err(AppError::Inference {
                message: "overloaded".into(),
                status_code: 503,
                retryable: true,
            }),
            Ok(batch_response(&[analysis_json("https://x.example/jobs/5", 80)])),
        ]);
        let stage = DeepAnalysisStage::new(llm, MockUsageSink::new());
        let mut ctx = context_with_jobs(7);

        stage.execute(&mut ctx).await.unwrap();

        let org_id = ctx.organizations[0].id;
        assert_eq!(ctx.analysis_results[&org_id].len(), 1);
        // Only the successful batch's usage was recorded.
        assert_eq!(ctx.usage_stats.calls, 1);
    }

    #[tokio::test]
    async fn no_content_means_no_calls() {
        let llm = MockLlmClient::new(vec![]);
        let stage = DeepAnalysisStage::new(llm.clone(), MockUsageSink::new());
        let mut ctx = context_with_jobs(3);
        ctx.job_details.clear();

        stage.execute(&mut ctx).await.unwrap();
        assert_eq!(llm.call_count(), 0);
        assert!(ctx.analysis_results.is_empty());
    }
}
