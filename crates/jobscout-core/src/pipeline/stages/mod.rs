//! The seven pipeline stages, in their fixed execution order.

mod candidate_profile;
mod cv_ingestion;
mod deep_analysis;
mod detail_fetch;
mod initial_match;
mod organization_scraping;
mod result_persistence;

pub use candidate_profile::CandidateProfileStage;
pub use cv_ingestion::CvIngestionStage;
pub use deep_analysis::DeepAnalysisStage;
pub use detail_fetch::{DetailFetchStage, RetryPolicy};
pub use initial_match::InitialMatchStage;
pub use organization_scraping::{OrganizationScrapingStage, filter_posting_links};
pub use result_persistence::ResultPersistenceStage;
