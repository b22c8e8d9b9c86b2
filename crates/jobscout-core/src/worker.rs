//! Queue worker: claims pending jobs and drives the pipeline for each.
//!
//! One worker polls the queue, claims up to a bounded batch of entries,
//! and runs their pipelines concurrently, each raced against a hard
//! wall-clock timeout. Success stamps the organization's last successful
//! scrape; failure increments the entry's retry count and eventually
//! flags the organization problematic. Shutdown is cooperative: a stop
//! signal lets in-flight jobs finish but claims nothing new.

use std::future::Future;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::organization::TrackedOrganization;
use crate::queue::{QueueEntry, WorkerConfig};
use crate::traits::OrganizationStore;
use crate::work_queue::WorkQueue;

/// The fixed candidate identity a worker processes jobs for.
#[derive(Debug, Clone)]
pub struct WorkerProfile {
    pub user_id: Uuid,
    pub cv_ref: String,
    pub candidate_info: Value,
}

/// What one pipeline run produced, as far as the queue cares.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    pub saved_count: usize,
}

/// Runs the matching pipeline for one organization.
///
/// Seam between the worker loop and the pipeline assembly, so the loop's
/// claim/timeout/retry behavior is testable with scripted outcomes.
pub trait JobProcessor: Send + Sync + Clone {
    fn process(
        &self,
        organization: &TrackedOrganization,
        profile: &WorkerProfile,
    ) -> impl Future<Output = Result<JobOutcome, AppError>> + Send;
}

/// Events emitted by the worker for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Started {
        worker_id: &'a str,
    },
    Polling,
    StuckReset {
        count: u64,
    },
    JobClaimed {
        entry: &'a QueueEntry,
    },
    JobCompleted {
        entry_id: Uuid,
        organization: &'a str,
        saved_count: usize,
    },
    JobFailed {
        entry_id: Uuid,
        error: &'a str,
        retry_count: u32,
    },
    Stopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Started { worker_id } => {
                tracing::info!(%worker_id, "Worker started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for jobs");
            }
            WorkerEvent::StuckReset { count } => {
                tracing::warn!(%count, "Reset stuck processing entries to pending");
            }
            WorkerEvent::JobClaimed { entry } => {
                tracing::info!(entry_id = %entry.id, organization_id = %entry.organization_id, "Job claimed");
            }
            WorkerEvent::JobCompleted {
                entry_id,
                organization,
                saved_count,
            } => {
                tracing::info!(%entry_id, %organization, %saved_count, "Job completed");
            }
            WorkerEvent::JobFailed {
                entry_id,
                error,
                retry_count,
            } => {
                tracing::warn!(%entry_id, %error, %retry_count, "Job failed");
            }
            WorkerEvent::Stopped { worker_id } => {
                tracing::info!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Worker that polls the work queue and processes matching jobs.
pub struct QueueWorker<Q, O, P>
where
    Q: WorkQueue + 'static,
    O: OrganizationStore + 'static,
    P: JobProcessor + 'static,
{
    queue: Q,
    orgs: O,
    processor: P,
    profile: WorkerProfile,
    config: WorkerConfig,
}

impl<Q, O, P> QueueWorker<Q, O, P>
where
    Q: WorkQueue + 'static,
    O: OrganizationStore + 'static,
    P: JobProcessor + 'static,
{
    pub fn new(queue: Q, orgs: O, processor: P, profile: WorkerProfile, config: WorkerConfig) -> Self {
        Self {
            queue,
            orgs,
            processor,
            profile,
            config,
        }
    }

    /// Run the poll loop until cancellation. In-flight jobs finish after
    /// the stop signal; no new jobs are claimed.
    pub async fn run<WR>(&self, cancel_token: CancellationToken, reporter: &WR)
    where
        WR: WorkerReporter + Clone + Send + 'static,
    {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling);
            self.sweep_stuck(reporter).await;

            let claimed = self.claim_batch(reporter).await;
            if claimed.is_empty() {
                tokio::select! {
                    () = tokio::time::sleep(self.config.poll_interval) => {}
                    () = cancel_token.cancelled() => break,
                }
                continue;
            }

            self.process_batch(claimed, reporter).await;
        }

        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });
    }

    /// Drain mode: process batches until the queue is empty, then return.
    /// For hosts that are not always on and run the worker from a
    /// scheduler.
    pub async fn run_once<WR>(&self, reporter: &WR)
    where
        WR: WorkerReporter + Clone + Send + 'static,
    {
        reporter.report(WorkerEvent::Started {
            worker_id: &self.config.worker_id,
        });
        self.sweep_stuck(reporter).await;

        loop {
            let claimed = self.claim_batch(reporter).await;
            if claimed.is_empty() {
                break;
            }
            self.process_batch(claimed, reporter).await;
        }

        reporter.report(WorkerEvent::Stopped {
            worker_id: &self.config.worker_id,
        });
    }

    /// A crashed worker leaves entries in processing with no other
    /// signal; reset the ones whose last attempt is too old.
    async fn sweep_stuck<WR: WorkerReporter>(&self, reporter: &WR) {
        match self.queue.reset_stuck(self.config.stuck_threshold).await {
            Ok(0) => {}
            Ok(count) => reporter.report(WorkerEvent::StuckReset { count }),
            Err(error) => {
                tracing::error!(error = %error, "Stuck-entry sweep failed");
            }
        }
    }

    async fn claim_batch<WR: WorkerReporter>(&self, reporter: &WR) -> Vec<QueueEntry> {
        let mut claimed = Vec::new();
        while claimed.len() < self.config.batch_size {
            match self.queue.claim_next().await {
                Ok(Some(entry)) => {
                    reporter.report(WorkerEvent::JobClaimed { entry: &entry });
                    claimed.push(entry);
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::error!(error = %error, "Failed to claim job");
                    break;
                }
            }
        }
        claimed
    }

    async fn process_batch<WR>(&self, claimed: Vec<QueueEntry>, reporter: &WR)
    where
        WR: WorkerReporter + Clone + Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for entry in claimed {
            let queue = self.queue.clone();
            let orgs = self.orgs.clone();
            let processor = self.processor.clone();
            let profile = self.profile.clone();
            let config = self.config.clone();
            let reporter = reporter.clone();
            tasks.spawn(async move {
                process_entry(entry, queue, orgs, processor, profile, config, reporter).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!(error = %error, "Job task panicked");
            }
        }
    }
}

async fn process_entry<Q, O, P, WR>(
    entry: QueueEntry,
    queue: Q,
    orgs: O,
    processor: P,
    profile: WorkerProfile,
    config: WorkerConfig,
    reporter: WR,
) where
    Q: WorkQueue,
    O: OrganizationStore,
    P: JobProcessor,
    WR: WorkerReporter,
{
    let organization = match orgs.get(entry.organization_id).await {
        Ok(Some(org)) => org,
        Ok(None) => {
            fail_entry(&queue, &entry, "organization not found", &config, &reporter).await;
            return;
        }
        Err(error) => {
            fail_entry(&queue, &entry, &error.to_string(), &config, &reporter).await;
            return;
        }
    };

    let result = tokio::time::timeout(
        config.job_timeout,
        processor.process(&organization, &profile),
    )
    .await;

    match result {
        Ok(Ok(outcome)) => {
            if let Err(error) = queue.complete(entry.id).await {
                tracing::error!(entry_id = %entry.id, error = %error, "Failed to mark job completed");
            }
            if let Err(error) = orgs.mark_scraped(organization.id, Utc::now()).await {
                tracing::error!(organization_id = %organization.id, error = %error, "Failed to stamp last successful scrape");
            }
            reporter.report(WorkerEvent::JobCompleted {
                entry_id: entry.id,
                organization: &organization.name,
                saved_count: outcome.saved_count,
            });
        }
        Ok(Err(error)) => {
            fail_entry(&queue, &entry, &error.to_string(), &config, &reporter).await;
        }
        Err(_) => {
            let message = format!(
                "Job timed out after {}s",
                config.job_timeout.as_secs()
            );
            fail_entry(&queue, &entry, &message, &config, &reporter).await;
        }
    }
}

async fn fail_entry<Q: WorkQueue, WR: WorkerReporter>(
    queue: &Q,
    entry: &QueueEntry,
    error: &str,
    config: &WorkerConfig,
    reporter: &WR,
) {
    match queue.fail(entry.id, error, config.max_failures).await {
        Ok(updated) => {
            reporter.report(WorkerEvent::JobFailed {
                entry_id: entry.id,
                error,
                retry_count: updated.retry_count,
            });
        }
        Err(queue_error) => {
            tracing::error!(entry_id = %entry.id, error = %queue_error, "Failed to mark job as failed");
        }
    }
}
