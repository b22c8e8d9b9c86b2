use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use uuid::Uuid;

use crate::organization::{AnalysisResult, MatchedJob, PostingLink, TrackedOrganization};
use crate::traits::{TokenUsage, UsageEvent, UsageOperation};
use crate::usage::{self, ModelLimits, UsageStats};

/// Shared state threaded through every pipeline stage.
///
/// Inputs are set once at construction; each stage fills in its own
/// output field. Kept as a plain struct with explicit optional fields so
/// stage contracts stay checkable.
#[derive(Debug)]
pub struct PipelineContext {
    // Input data
    pub organizations: Vec<TrackedOrganization>,
    pub cv_ref: String,
    pub candidate_info: Value,
    pub user_id: Uuid,

    // Stage outputs
    pub candidate_profile: Option<Value>,
    pub cv_content: Option<String>,
    /// Newly-seen posting links per organization.
    pub scraped_links: HashMap<Uuid, Vec<PostingLink>>,
    pub matched_jobs: Option<Vec<MatchedJob>>,
    /// Full page content per shortlisted URL.
    pub job_details: HashMap<String, String>,
    /// Scored analyses per organization, best first.
    pub analysis_results: BTreeMap<Uuid, Vec<AnalysisResult>>,
    /// The subset of analyses actually persisted, per organization.
    pub saved_jobs: BTreeMap<Uuid, Vec<AnalysisResult>>,
    pub saved_count: usize,

    // Accounting
    pub usage_stats: UsageStats,
    pub model_limits: ModelLimits,
    /// Identifies this run in the token-usage log.
    pub process_id: Uuid,
    /// Organization currently being processed, for token-cost attribution.
    pub current_organization: Option<Uuid>,
}

impl PipelineContext {
    pub fn new(
        organizations: Vec<TrackedOrganization>,
        cv_ref: impl Into<String>,
        candidate_info: Value,
        user_id: Uuid,
        model_limits: ModelLimits,
    ) -> Self {
        Self {
            organizations,
            cv_ref: cv_ref.into(),
            candidate_info,
            user_id,
            candidate_profile: None,
            cv_content: None,
            scraped_links: HashMap::new(),
            matched_jobs: None,
            job_details: HashMap::new(),
            analysis_results: BTreeMap::new(),
            saved_jobs: BTreeMap::new(),
            saved_count: 0,
            usage_stats: UsageStats::new(),
            model_limits,
            process_id: Uuid::new_v4(),
            current_organization: None,
        }
    }

    pub fn set_organization_context(&mut self, organization_id: Uuid) {
        self.current_organization = Some(organization_id);
    }

    /// All newly-seen links across organizations, in organization order.
    pub fn all_new_links(&self) -> Vec<PostingLink> {
        let mut links = Vec::new();
        for org in &self.organizations {
            if let Some(found) = self.scraped_links.get(&org.id) {
                links.extend(found.iter().cloned());
            }
        }
        links
    }

    /// The organization that a scraped URL belongs to.
    pub fn organization_for_url(&self, url: &str) -> Option<Uuid> {
        for (org_id, links) in &self.scraped_links {
            if links.iter().any(|l| l.url == url) {
                return Some(*org_id);
            }
        }
        None
    }

    /// Fold one inference call into the run's counters and produce the
    /// corresponding usage-log event.
    pub fn record_usage(&mut self, operation: UsageOperation, usage: TokenUsage) -> UsageEvent {
        usage::check_daily_reset(&mut self.usage_stats);
        usage::update(&mut self.usage_stats, usage.total_tokens);
        UsageEvent {
            process_id: self.process_id,
            operation,
            prompt_tokens: usage.prompt_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            cost_usd: self
                .model_limits
                .cost_for(usage.prompt_tokens, usage.output_tokens),
            user_id: self.user_id,
            organization_id: self.current_organization,
        }
    }

    /// Log final usage and drop per-run working state.
    pub fn cleanup(&mut self) {
        let summary = usage::usage_summary(&self.model_limits, &self.usage_stats);
        tracing::info!(usage = %summary, "Pipeline usage");

        self.scraped_links.clear();
        self.job_details.clear();
        self.analysis_results.clear();
        self.cv_content = None;
        self.candidate_profile = None;
        self.matched_jobs = None;
        self.current_organization = None;
    }
}
