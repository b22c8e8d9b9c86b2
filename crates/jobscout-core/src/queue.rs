use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a scrape/match job in the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }

    /// Statuses that count as "live" for the one-entry-per-organization
    /// invariant.
    pub fn is_live(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            _ => Err(format!("Unknown queue status: {}", s)),
        }
    }
}

/// One queued scrape/match job, keyed by organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

/// Configuration for a queue worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Maximum entries claimed and processed concurrently per poll cycle.
    pub batch_size: usize,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Hard wall-clock ceiling per job; expiry counts as a job failure.
    pub job_timeout: Duration,
    /// Processing entries with an older `last_attempt_at` are presumed
    /// abandoned and reset to pending.
    pub stuck_threshold: Duration,
    /// Cumulative failures after which the organization is flagged.
    pub max_failures: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            batch_size: 5,
            poll_interval: Duration::from_secs(20),
            job_timeout: Duration::from_secs(10 * 60),
            stuck_threshold: Duration::from_secs(30 * 60),
            max_failures: 3,
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Completed,
            QueueStatus::Failed,
        ] {
            let parsed: QueueStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_live_and_terminal_states() {
        assert!(QueueStatus::Pending.is_live());
        assert!(QueueStatus::Processing.is_live());
        assert!(!QueueStatus::Completed.is_live());
        assert!(!QueueStatus::Failed.is_live());

        assert!(!QueueStatus::Pending.is_terminal());
        assert!(!QueueStatus::Processing.is_terminal());
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Failed.is_terminal());
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.poll_interval, Duration::from_secs(20));
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert_eq!(config.stuck_threshold, Duration::from_secs(1800));
        assert_eq!(config.max_failures, 3);
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn test_batch_size_floor() {
        let config = WorkerConfig::default().with_batch_size(0);
        assert_eq!(config.batch_size, 1);
    }
}
