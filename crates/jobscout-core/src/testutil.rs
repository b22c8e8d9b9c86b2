//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks
//! use `Arc<Mutex<_>>` for interior mutability, allowing test assertions
//! on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::organization::{
    NewSavedJob, PostingLink, SavedJob, ScrapeHistoryRecord, TrackedOrganization,
};
use crate::pipeline::PipelineContext;
use crate::queue::{QueueEntry, QueueStatus};
use crate::traits::{
    DocumentTextExtractor, FetchedPage, HistoryStore, LlmClient, LlmResponse, OrganizationStore,
    PageFetcher, SavedJobStore, UsageEvent, UsageSink,
};
use crate::usage::ModelLimits;
use crate::work_queue::WorkQueue;
use crate::worker::{JobOutcome, JobProcessor, WorkerProfile};

// ---------------------------------------------------------------------------
// MockPageFetcher
// ---------------------------------------------------------------------------

enum FetchBehavior {
    /// Queue of responses; each call pops the first. Empty queue returns
    /// a default page.
    Queue(Vec<Result<FetchedPage, AppError>>),
    /// One response per URL; unknown URLs get a default page.
    PerUrl(HashMap<String, Result<FetchedPage, AppError>>),
    /// Every call fails with this message.
    AlwaysFail(String),
}

/// Mock page fetcher with configurable responses.
#[derive(Clone)]
pub struct MockPageFetcher {
    behavior: Arc<Mutex<FetchBehavior>>,
    calls: Arc<AtomicUsize>,
}

impl MockPageFetcher {
    pub fn with_page(page: FetchedPage) -> Self {
        Self::with_results(vec![Ok(page)])
    }

    pub fn with_pages(pages: Vec<FetchedPage>) -> Self {
        Self::with_results(pages.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<FetchedPage, AppError>>) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(FetchBehavior::Queue(results))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn per_url(entries: Vec<(String, Result<FetchedPage, AppError>)>) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(FetchBehavior::PerUrl(
                entries.into_iter().collect(),
            ))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always_failing(error: AppError) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(FetchBehavior::AlwaysFail(error.to_string()))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn default_page() -> FetchedPage {
        FetchedPage {
            content: "default page".to_string(),
            links: vec![],
        }
    }
}

impl PageFetcher for MockPageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut behavior = self.behavior.lock().unwrap();
        match &mut *behavior {
            FetchBehavior::Queue(queue) => {
                if queue.is_empty() {
                    Ok(Self::default_page())
                } else {
                    queue.remove(0)
                }
            }
            FetchBehavior::PerUrl(map) => match map.remove(url) {
                Some(result) => result,
                None => Ok(Self::default_page()),
            },
            FetchBehavior::AlwaysFail(message) => Err(AppError::Http(message.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockDocumentExtractor
// ---------------------------------------------------------------------------

/// Mock CV extractor returning configurable text.
#[derive(Clone)]
pub struct MockDocumentExtractor {
    response: Arc<Mutex<Result<String, AppError>>>,
}

impl MockDocumentExtractor {
    pub fn new(text: &str) -> Self {
        Self {
            response: Arc::new(Mutex::new(Ok(text.to_string()))),
        }
    }

    pub fn with_error(error: AppError) -> Self {
        Self {
            response: Arc::new(Mutex::new(Err(error))),
        }
    }
}

impl DocumentTextExtractor for MockDocumentExtractor {
    async fn extract_text(&self, _file_ref: &str) -> Result<String, AppError> {
        let mut response = self.response.lock().unwrap();
        // Errors are one-shot: taking one leaves an empty placeholder.
        let taken = std::mem::replace(&mut *response, Ok(String::new()));
        if let Ok(text) = &taken {
            *response = Ok(text.clone());
        }
        taken
    }
}

// ---------------------------------------------------------------------------
// MockLlmClient
// ---------------------------------------------------------------------------

/// Mock inference client: pops queued responses and records prompts.
#[derive(Clone)]
pub struct MockLlmClient {
    responses: Arc<Mutex<Vec<Result<LlmResponse, AppError>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<Result<LlmResponse, AppError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            prompts: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmClient for MockLlmClient {
    async fn generate(
        &self,
        prompt: &str,
        _response_schema: &serde_json::Value,
    ) -> Result<LlmResponse, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(LlmResponse {
                json: json!({}),
                usage: crate::traits::TokenUsage::default(),
            })
        } else {
            responses.remove(0)
        }
    }
}

// ---------------------------------------------------------------------------
// MockHistoryStore
// ---------------------------------------------------------------------------

/// In-memory scrape-history store keyed by (organization, user).
#[derive(Clone, Default)]
pub struct MockHistoryStore {
    records: Arc<Mutex<HashMap<(Uuid, Uuid), ScrapeHistoryRecord>>>,
}

impl MockHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MockHistoryStore {
    async fn get_last(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ScrapeHistoryRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(organization_id, user_id))
            .cloned())
    }

    async fn record(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        links: &[PostingLink],
    ) -> Result<(), AppError> {
        self.records.lock().unwrap().insert(
            (organization_id, user_id),
            ScrapeHistoryRecord {
                organization_id,
                user_id,
                last_scrape_date: Utc::now(),
                links: links.to_vec(),
            },
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockSavedJobStore
// ---------------------------------------------------------------------------

/// In-memory saved-job store with an optional scripted first failure.
#[derive(Clone, Default)]
pub struct MockSavedJobStore {
    saved: Arc<Mutex<Vec<NewSavedJob>>>,
    fail_next: Arc<Mutex<Option<AppError>>>,
}

impl MockSavedJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `save` call fails with `error`; later calls succeed.
    pub fn failing_once(error: AppError) -> Self {
        Self {
            saved: Arc::new(Mutex::new(Vec::new())),
            fail_next: Arc::new(Mutex::new(Some(error))),
        }
    }

    pub fn saved(&self) -> Vec<NewSavedJob> {
        self.saved.lock().unwrap().clone()
    }
}

impl SavedJobStore for MockSavedJobStore {
    async fn exists(&self, user_id: Uuid, url: &str, _title: &str) -> Result<bool, AppError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .iter()
            .any(|job| job.user_id == user_id && job.url == url))
    }

    async fn save(&self, job: &NewSavedJob) -> Result<Uuid, AppError> {
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }
        self.saved.lock().unwrap().push(job.clone());
        Ok(Uuid::new_v4())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<SavedJob>, AppError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .iter()
            .filter(|job| job.user_id == user_id)
            .map(|job| SavedJob {
                id: Uuid::new_v4(),
                user_id: job.user_id,
                organization_id: job.organization_id,
                title: job.title.clone(),
                url: job.url.clone(),
                suitability_score: job.suitability_score,
                analysis: job.analysis.clone(),
                created_at: Utc::now(),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockOrganizationStore
// ---------------------------------------------------------------------------

/// In-memory organization store recording tracking mutations.
#[derive(Clone, Default)]
pub struct MockOrganizationStore {
    orgs: Arc<Mutex<HashMap<Uuid, TrackedOrganization>>>,
}

impl MockOrganizationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orgs(orgs: Vec<TrackedOrganization>) -> Self {
        Self {
            orgs: Arc::new(Mutex::new(orgs.into_iter().map(|o| (o.id, o)).collect())),
        }
    }

    pub fn insert(&self, org: TrackedOrganization) {
        self.orgs.lock().unwrap().insert(org.id, org);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<TrackedOrganization> {
        self.orgs.lock().unwrap().get(&id).cloned()
    }
}

impl OrganizationStore for MockOrganizationStore {
    async fn get(&self, id: Uuid) -> Result<Option<TrackedOrganization>, AppError> {
        Ok(self.orgs.lock().unwrap().get(&id).cloned())
    }

    async fn list_tracking(&self) -> Result<Vec<TrackedOrganization>, AppError> {
        let mut orgs: Vec<_> = self
            .orgs
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.is_tracking)
            .cloned()
            .collect();
        orgs.sort_by_key(|o| o.id);
        Ok(orgs)
    }

    async fn mark_scraped(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(org) = self.orgs.lock().unwrap().get_mut(&id) {
            org.last_successful_scrape_at = Some(at);
        }
        Ok(())
    }

    async fn mark_problematic(&self, id: Uuid) -> Result<(), AppError> {
        if let Some(org) = self.orgs.lock().unwrap().get_mut(&id) {
            org.is_problematic = true;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockWorkQueue
// ---------------------------------------------------------------------------

/// In-memory work queue. Claims serialize through one mutex, standing in
/// for the database's atomic conditional update.
#[derive(Clone, Default)]
pub struct MockWorkQueue {
    entries: Arc<Mutex<Vec<QueueEntry>>>,
    orgs: Option<MockOrganizationStore>,
}

impl MockWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that flags organizations problematic through `orgs` when
    /// their failures accumulate.
    pub fn with_organizations(orgs: MockOrganizationStore) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            orgs: Some(orgs),
        }
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl WorkQueue for MockWorkQueue {
    async fn enqueue(&self, organization_id: Uuid) -> Result<Option<QueueEntry>, AppError> {
        let mut entries = self.entries.lock().unwrap();
        let already_live = entries
            .iter()
            .any(|e| e.organization_id == organization_id && e.status.is_live());
        if already_live {
            return Ok(None);
        }
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            organization_id,
            status: QueueStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_attempt_at: None,
            completed_at: None,
            error_message: None,
            retry_count: 0,
        };
        entries.push(entry.clone());
        Ok(Some(entry))
    }

    async fn claim_next(&self) -> Result<Option<QueueEntry>, AppError> {
        let mut entries = self.entries.lock().unwrap();
        let next = entries
            .iter_mut()
            .filter(|e| e.status == QueueStatus::Pending)
            .min_by_key(|e| e.created_at);
        Ok(next.map(|entry| {
            entry.status = QueueStatus::Processing;
            entry.last_attempt_at = Some(Utc::now());
            entry.updated_at = Utc::now();
            entry.clone()
        }))
    }

    async fn complete(&self, entry_id: Uuid) -> Result<(), AppError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == entry_id) {
            entry.status = QueueStatus::Completed;
            entry.completed_at = Some(Utc::now());
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail(
        &self,
        entry_id: Uuid,
        error: &str,
        max_failures: u32,
    ) -> Result<QueueEntry, AppError> {
        let (entry, org_failures) = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .iter_mut()
                .find(|e| e.id == entry_id)
                .ok_or_else(|| AppError::Database(format!("No queue entry {entry_id}")))?;
            entry.status = QueueStatus::Failed;
            entry.retry_count += 1;
            entry.error_message = Some(error.to_string());
            entry.updated_at = Utc::now();
            let entry = entry.clone();
            let failures = entries
                .iter()
                .filter(|e| {
                    e.organization_id == entry.organization_id && e.status == QueueStatus::Failed
                })
                .count() as u32;
            (entry, failures)
        };

        if org_failures >= max_failures {
            if let Some(orgs) = &self.orgs {
                orgs.mark_problematic(entry.organization_id).await?;
            }
        }
        Ok(entry)
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<QueueEntry>, AppError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == entry_id)
            .cloned())
    }

    async fn count_by_status(&self, status: QueueStatus) -> Result<i64, AppError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.status == status)
            .count() as i64)
    }

    async fn list_stuck(&self, threshold: Duration) -> Result<Vec<QueueEntry>, AppError> {
        let cutoff = Utc::now() - chrono::TimeDelta::from_std(threshold).unwrap_or_default();
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.status == QueueStatus::Processing
                    && e.last_attempt_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn reset_stuck(&self, threshold: Duration) -> Result<u64, AppError> {
        let cutoff = Utc::now() - chrono::TimeDelta::from_std(threshold).unwrap_or_default();
        let mut entries = self.entries.lock().unwrap();
        let mut reset = 0u64;
        for entry in entries.iter_mut() {
            if entry.status == QueueStatus::Processing
                && entry.last_attempt_at.is_some_and(|at| at < cutoff)
            {
                entry.status = QueueStatus::Pending;
                entry.updated_at = Utc::now();
                reset += 1;
            }
        }
        Ok(reset)
    }
}

// ---------------------------------------------------------------------------
// MockUsageSink
// ---------------------------------------------------------------------------

/// Usage sink that records events, or fails every write.
#[derive(Clone, Default)]
pub struct MockUsageSink {
    events: Arc<Mutex<Vec<UsageEvent>>>,
    failing: bool,
}

impl MockUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            failing: true,
        }
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl UsageSink for MockUsageSink {
    async fn record(&self, event: &UsageEvent) -> Result<(), AppError> {
        if self.failing {
            return Err(AppError::Database("usage sink unavailable".into()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockJobProcessor
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum ProcessBehavior {
    Ok(JobOutcome),
    Fail(String),
    Hang,
}

/// Scripted pipeline runner for worker tests.
#[derive(Clone)]
pub struct MockJobProcessor {
    behavior: ProcessBehavior,
    calls: Arc<AtomicUsize>,
}

impl MockJobProcessor {
    pub fn succeeding(saved_count: usize) -> Self {
        Self {
            behavior: ProcessBehavior::Ok(JobOutcome { saved_count }),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            behavior: ProcessBehavior::Fail(message.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Never completes; exercises the worker's job timeout.
    pub fn hanging() -> Self {
        Self {
            behavior: ProcessBehavior::Hang,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl JobProcessor for MockJobProcessor {
    async fn process(
        &self,
        _organization: &TrackedOrganization,
        _profile: &WorkerProfile,
    ) -> Result<JobOutcome, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ProcessBehavior::Ok(outcome) => Ok(outcome.clone()),
            ProcessBehavior::Fail(message) => Err(AppError::Generic(message.clone())),
            ProcessBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Ok(JobOutcome::default())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A tracked organization with the given rank, never scraped.
pub fn make_test_org(rank: i32) -> TrackedOrganization {
    let id = Uuid::new_v4();
    TrackedOrganization {
        id,
        name: format!("org-{}", &id.to_string()[..8]),
        careers_url: format!("https://careers.example/{id}"),
        rank,
        last_successful_scrape_at: None,
        is_problematic: false,
        is_tracking: true,
    }
}

/// A bare context: one never-scraped organization, no stage outputs.
pub fn make_test_context() -> PipelineContext {
    PipelineContext::new(
        vec![make_test_org(90)],
        "https://drive.google.com/file/d/test/view",
        json!({"name": "Sam", "skills": {"languages": ["Rust"]}}),
        Uuid::new_v4(),
        ModelLimits::unlimited("test-model"),
    )
}

/// A context ready for the matching stages: CV text and profile present,
/// and the given links recorded as newly scraped for the organization.
pub fn make_ready_context(links: &[PostingLink]) -> PipelineContext {
    let mut ctx = make_test_context();
    ctx.cv_content = Some("Experienced Rust engineer.".to_string());
    ctx.candidate_profile = Some(json!({"name": "Sam", "skills": {"languages": ["Rust"]}}));
    if !links.is_empty() {
        let org_id = ctx.organizations[0].id;
        ctx.scraped_links.insert(org_id, links.to_vec());
    }
    ctx
}

/// A standard worker identity for queue tests.
pub fn make_test_profile() -> WorkerProfile {
    WorkerProfile {
        user_id: Uuid::new_v4(),
        cv_ref: "https://drive.google.com/file/d/test/view".to_string(),
        candidate_info: json!({"name": "Sam"}),
    }
}
