use async_trait::async_trait;

use crate::error::AppError;
use crate::organization::NewSavedJob;
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::traits::SavedJobStore;

/// Persists each organization's analysis results, skipping jobs the user
/// already has saved. The context ends up tracking exactly the set that
/// was written, so caller-facing counts reflect persisted jobs rather
/// than analyzed ones.
pub struct ResultPersistenceStage<S: SavedJobStore> {
    store: S,
}

impl<S: SavedJobStore> ResultPersistenceStage<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: SavedJobStore> PipelineStage for ResultPersistenceStage<S> {
    fn name(&self) -> &'static str {
        "ResultPersistence"
    }

    fn description(&self) -> &'static str {
        "Saves newly-qualifying analysis results"
    }

    fn can_skip(&self, ctx: &PipelineContext) -> bool {
        ctx.analysis_results.is_empty()
    }

    fn validate(&self, ctx: &PipelineContext) -> Result<(), AppError> {
        if ctx.organizations.is_empty() {
            return Err(AppError::Validation(
                "Organizations are required for saving results".into(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), AppError> {
        let mut total_saved = 0usize;
        let mut total_skipped = 0usize;
        let mut total_failed = 0usize;

        let user_id = ctx.user_id;
        let mut saved_jobs = std::collections::BTreeMap::new();
        for (org_id, org_results) in &ctx.analysis_results {
            let mut saved_here = Vec::new();
            for job in org_results {
                // Duplicate detection is an expected skip, not an error.
                if self.store.exists(user_id, &job.url, &job.title).await? {
                    tracing::debug!(url = %job.url, "Skipping already-saved job");
                    total_skipped += 1;
                    continue;
                }
                let new_job = NewSavedJob::from_analysis(user_id, *org_id, job);
                match self.store.save(&new_job).await {
                    Ok(id) => {
                        tracing::debug!(saved_job_id = %id, url = %job.url, "Saved job");
                        saved_here.push(job.clone());
                        total_saved += 1;
                    }
                    Err(error) => {
                        // One bad row must not cost the rest of the run's
                        // results.
                        tracing::error!(url = %job.url, error = %error, "Failed to save job");
                        total_failed += 1;
                    }
                }
            }
            if !saved_here.is_empty() {
                saved_jobs.insert(*org_id, saved_here);
            }
        }
        ctx.saved_jobs = saved_jobs;
        ctx.saved_count = total_saved;

        tracing::info!(
            saved = total_saved,
            duplicates = total_skipped,
            failed = total_failed,
            "Result persistence completed"
        );
        Ok(())
    }

    async fn on_error(&self, error: &AppError, ctx: &mut PipelineContext) {
        let analyzed: usize = ctx.analysis_results.values().map(Vec::len).sum();
        tracing::error!(
            error = %error,
            analyzed,
            organizations = ctx.organizations.len(),
            user_id = %ctx.user_id,
            "Result persistence stage failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organization::AnalysisResult;
    use crate::testutil::{MockSavedJobStore, make_ready_context};

    fn analysis(url: &str, title: &str, score: i32) -> AnalysisResult {
        AnalysisResult {
            title: title.into(),
            url: url.into(),
            suitability_score: score,
            good_fit_reasons: vec!["fits".into()],
            consideration_points: vec![],
            stretch_goals: vec![],
            location: None,
            tech_stack: None,
            salary: None,
            experience_level: None,
            language_requirements: None,
            visa_sponsorship_offered: None,
            relocation_assistance_offered: None,
        }
    }

    #[tokio::test]
    async fn saves_new_jobs_and_tracks_only_persisted_set() {
        let store = MockSavedJobStore::new();
        let stage = ResultPersistenceStage::new(store.clone());
        let mut ctx = make_ready_context(&[]);
        let org_id = ctx.organizations[0].id;
        ctx.analysis_results.insert(
            org_id,
            vec![
                analysis("https://x.example/jobs/1", "Backend", 80),
                analysis("https://x.example/jobs/2", "Platform", 70),
            ],
        );

        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.saved_count, 2);
        assert_eq!(ctx.saved_jobs[&org_id].len(), 2);
        assert_eq!(store.saved().len(), 2);
    }

    #[tokio::test]
    async fn duplicates_are_skipped_not_saved() {
        let store = MockSavedJobStore::new();
        let stage = ResultPersistenceStage::new(store.clone());
        let mut ctx = make_ready_context(&[]);
        let org_id = ctx.organizations[0].id;
        let user_id = ctx.user_id;

        // Pre-seed the store with one of the two results.
        let existing = analysis("https://x.example/jobs/1", "Backend", 80);
        store
            .save(&NewSavedJob::from_analysis(user_id, org_id, &existing))
            .await
            .unwrap();

        ctx.analysis_results.insert(
            org_id,
            vec![
                analysis("https://x.example/jobs/1", "Backend", 80),
                analysis("https://x.example/jobs/2", "Platform", 70),
            ],
        );

        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.saved_count, 1);
        assert_eq!(ctx.saved_jobs[&org_id].len(), 1);
        assert_eq!(ctx.saved_jobs[&org_id][0].url, "https://x.example/jobs/2");
    }

    #[tokio::test]
    async fn per_job_save_failure_keeps_the_rest() {
        let store = MockSavedJobStore::failing_once(AppError::Database("disk full".into()));
        let stage = ResultPersistenceStage::new(store.clone());
        let mut ctx = make_ready_context(&[]);
        let org_id = ctx.organizations[0].id;
        ctx.analysis_results.insert(
            org_id,
            vec![
                analysis("https://x.example/jobs/1", "Backend", 80),
                analysis("https://x.example/jobs/2", "Platform", 70),
            ],
        );

        stage.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.saved_count, 1);
        assert_eq!(ctx.saved_jobs[&org_id][0].url, "https://x.example/jobs/2");
    }

    #[tokio::test]
    async fn no_results_means_stage_is_skippable() {
        let stage = ResultPersistenceStage::new(MockSavedJobStore::new());
        let ctx = make_ready_context(&[]);
        assert!(stage.can_skip(&ctx));
    }
}
