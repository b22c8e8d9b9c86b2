pub mod batch;
pub mod error;
pub mod matching;
pub mod organization;
pub mod pipeline;
pub mod queue;
pub mod schedule;
pub mod service;
pub mod testutil;
pub mod traits;
pub mod usage;
pub mod work_queue;
pub mod worker;

pub use error::AppError;
pub use organization::{AnalysisResult, MatchedJob, PostingLink, TrackedOrganization};
pub use queue::{QueueEntry, QueueStatus, WorkerConfig};
pub use service::{MatchService, OrganizationOutcome};
pub use usage::{ModelLimits, UsageStats};
pub use work_queue::WorkQueue;
pub use worker::{QueueWorker, WorkerProfile};
