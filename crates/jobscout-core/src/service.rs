//! Pipeline assembly and the operations exposed to the rest of the
//! application: match one organization, match a batch, and the queue
//! worker's per-job entry point.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::AppError;
use crate::organization::{AnalysisResult, TrackedOrganization};
use crate::pipeline::stages::{
    CandidateProfileStage, CvIngestionStage, DeepAnalysisStage, DetailFetchStage,
    InitialMatchStage, OrganizationScrapingStage, ResultPersistenceStage,
};
use crate::pipeline::{PipelineContext, PipelineEngine, PipelineOptions, PipelineRun};
use crate::traits::{
    DocumentTextExtractor, HistoryStore, LlmClient, OrganizationStore, PageFetcher, SavedJobStore,
    UsageSink,
};
use crate::usage::ModelLimits;
use crate::worker::{JobOutcome, JobProcessor, WorkerProfile};

/// Per-organization result of a batch match call.
///
/// Unknown organizations yield `processed: false` with a reason instead
/// of failing the whole batch.
#[derive(Debug, Clone)]
pub struct OrganizationOutcome {
    pub processed: bool,
    pub reason: Option<String>,
    pub results: Vec<AnalysisResult>,
}

impl OrganizationOutcome {
    fn unprocessed(reason: impl Into<String>) -> Self {
        Self {
            processed: false,
            reason: Some(reason.into()),
            results: Vec::new(),
        }
    }

    fn processed(results: Vec<AnalysisResult>) -> Self {
        Self {
            processed: true,
            reason: None,
            results,
        }
    }
}

/// Assembles the seven-stage pipeline around injected collaborators and
/// runs it for one organization or a batch.
#[derive(Clone)]
pub struct MatchService<F, D, L, H, S, O, U>
where
    F: PageFetcher + 'static,
    D: DocumentTextExtractor + 'static,
    L: LlmClient + 'static,
    H: HistoryStore + 'static,
    S: SavedJobStore + 'static,
    O: OrganizationStore + 'static,
    U: UsageSink + 'static,
{
    fetcher: F,
    cv_extractor: D,
    llm: L,
    history: H,
    saved_jobs: S,
    orgs: O,
    usage_sink: U,
    model_limits: ModelLimits,
    options: PipelineOptions,
}

impl<F, D, L, H, S, O, U> MatchService<F, D, L, H, S, O, U>
where
    F: PageFetcher + 'static,
    D: DocumentTextExtractor + 'static,
    L: LlmClient + 'static,
    H: HistoryStore + 'static,
    S: SavedJobStore + 'static,
    O: OrganizationStore + 'static,
    U: UsageSink + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: F,
        cv_extractor: D,
        llm: L,
        history: H,
        saved_jobs: S,
        orgs: O,
        usage_sink: U,
        model_limits: ModelLimits,
    ) -> Self {
        Self {
            fetcher,
            cv_extractor,
            llm,
            history,
            saved_jobs,
            orgs,
            usage_sink,
            model_limits,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// The seven stages in their fixed order.
    fn build_engine(&self) -> PipelineEngine {
        PipelineEngine::new(self.options.clone())
            .add_stage(Box::new(CandidateProfileStage))
            .add_stage(Box::new(CvIngestionStage::new(self.cv_extractor.clone())))
            .add_stage(Box::new(OrganizationScrapingStage::new(
                self.fetcher.clone(),
                self.history.clone(),
            )))
            .add_stage(Box::new(InitialMatchStage::new(
                self.llm.clone(),
                self.usage_sink.clone(),
            )))
            .add_stage(Box::new(DetailFetchStage::new(self.fetcher.clone())))
            .add_stage(Box::new(DeepAnalysisStage::new(
                self.llm.clone(),
                self.usage_sink.clone(),
            )))
            .add_stage(Box::new(ResultPersistenceStage::new(
                self.saved_jobs.clone(),
            )))
    }

    async fn run_pipeline(
        &self,
        organizations: Vec<TrackedOrganization>,
        profile: &WorkerProfile,
    ) -> Result<PipelineRun, AppError> {
        let ctx = PipelineContext::new(
            organizations,
            profile.cv_ref.clone(),
            profile.candidate_info.clone(),
            profile.user_id,
            self.model_limits.clone(),
        );
        let mut run = self.build_engine().execute(ctx).await?.into_result()?;
        run.context.cleanup();
        Ok(run)
    }

    /// Run the full pipeline for one organization and return the jobs
    /// that were actually persisted for it.
    pub async fn match_one_organization(
        &self,
        organization: TrackedOrganization,
        profile: &WorkerProfile,
    ) -> Result<Vec<AnalysisResult>, AppError> {
        let org_id = organization.id;
        let mut run = self.run_pipeline(vec![organization], profile).await?;
        Ok(run.context.saved_jobs.remove(&org_id).unwrap_or_default())
    }

    /// Run one shared pipeline over a batch of organization ids.
    ///
    /// Ids that don't resolve get an unprocessed outcome with a reason;
    /// the rest share a single pipeline run, and each outcome carries
    /// the organization's *persisted* result set.
    pub async fn match_organization_batch(
        &self,
        organization_ids: &[Uuid],
        profile: &WorkerProfile,
    ) -> Result<BTreeMap<Uuid, OrganizationOutcome>, AppError> {
        let mut outcomes = BTreeMap::new();
        let mut found = Vec::new();

        for &id in organization_ids {
            match self.orgs.get(id).await? {
                Some(org) => found.push(org),
                None => {
                    tracing::warn!(organization_id = %id, "Organization not found for batch match");
                    outcomes.insert(id, OrganizationOutcome::unprocessed("organization not found"));
                }
            }
        }

        if found.is_empty() {
            return Ok(outcomes);
        }

        let found_ids: Vec<Uuid> = found.iter().map(|o| o.id).collect();
        let mut run = self.run_pipeline(found, profile).await?;
        for id in found_ids {
            let results = run.context.saved_jobs.remove(&id).unwrap_or_default();
            outcomes.insert(id, OrganizationOutcome::processed(results));
        }
        Ok(outcomes)
    }
}

impl<F, D, L, H, S, O, U> JobProcessor for MatchService<F, D, L, H, S, O, U>
where
    F: PageFetcher + 'static,
    D: DocumentTextExtractor + 'static,
    L: LlmClient + 'static,
    H: HistoryStore + 'static,
    S: SavedJobStore + 'static,
    O: OrganizationStore + 'static,
    U: UsageSink + 'static,
{
    async fn process(
        &self,
        organization: &TrackedOrganization,
        profile: &WorkerProfile,
    ) -> Result<JobOutcome, AppError> {
        let run = self.run_pipeline(vec![organization.clone()], profile).await?;
        Ok(JobOutcome {
            saved_count: run.context.saved_count,
        })
    }
}
