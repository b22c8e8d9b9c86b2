use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An organization whose careers page is tracked for a user.
///
/// `rank` (1-100) is caller-assigned priority; higher means the careers
/// page is rechecked more often. `last_successful_scrape_at` is stamped
/// by the queue worker, `is_problematic` by repeated job failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedOrganization {
    pub id: Uuid,
    pub name: String,
    pub careers_url: String,
    pub rank: i32,
    pub last_successful_scrape_at: Option<DateTime<Utc>>,
    pub is_problematic: bool,
    pub is_tracking: bool,
}

/// A link extracted from a careers page: URL plus the display text and
/// the surrounding context the page gave it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingLink {
    pub url: String,
    pub text: String,
    #[serde(default)]
    pub context: String,
}

impl PostingLink {
    pub fn new(url: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            text: text.into(),
            context: String::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// Per (organization, user) record of the posting links seen at the last
/// scrape. Overwritten in full on every scrape attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeHistoryRecord {
    pub organization_id: Uuid,
    pub user_id: Uuid,
    pub last_scrape_date: DateTime<Utc>,
    pub links: Vec<PostingLink>,
}

/// A posting the inference service shortlisted as plausibly relevant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedJob {
    pub title: String,
    pub url: String,
}

/// Scored analysis of one posting, produced by the deep-analysis stage.
///
/// Serialized in camelCase: the shape is shared with the inference
/// service's response schema and the persisted analysis payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub title: String,
    pub url: String,
    /// 0-100; zero means the model rejected the posting outright.
    pub suitability_score: i32,
    pub good_fit_reasons: Vec<String>,
    pub consideration_points: Vec<String>,
    pub stretch_goals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tech_stack: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_requirements: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visa_sponsorship_offered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relocation_assistance_offered: Option<bool>,
}

/// A persisted job match, as stored for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub url: String,
    pub suitability_score: i32,
    pub analysis: AnalysisResult,
    pub created_at: DateTime<Utc>,
}

/// DTO for inserting a new saved job.
#[derive(Debug, Clone, Serialize)]
pub struct NewSavedJob {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub url: String,
    pub suitability_score: i32,
    pub analysis: AnalysisResult,
}

impl NewSavedJob {
    pub fn from_analysis(user_id: Uuid, organization_id: Uuid, analysis: &AnalysisResult) -> Self {
        Self {
            user_id,
            organization_id,
            title: analysis.title.clone(),
            url: analysis.url.clone(),
            suitability_score: analysis.suitability_score,
            analysis: analysis.clone(),
        }
    }
}
