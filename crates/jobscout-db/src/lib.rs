pub mod config;
pub mod database;
pub mod history_repository;
pub mod organization_repository;
pub mod queue_repository;
pub mod saved_job_repository;
pub mod usage_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use history_repository::ScrapeHistoryRepository;
pub use organization_repository::{NewOrganization, OrganizationRepository};
pub use queue_repository::WorkQueueRepository;
pub use saved_job_repository::SavedJobRepository;
pub use usage_repository::TokenUsageRepository;
