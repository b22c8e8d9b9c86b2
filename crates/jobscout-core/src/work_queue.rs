use std::future::Future;
use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;
use crate::queue::{QueueEntry, QueueStatus};

/// Persistent FIFO of pending scrape/match jobs, keyed by organization.
///
/// Implementations must make `claim_next` a single atomic read-modify-write
/// (`SELECT FOR UPDATE SKIP LOCKED` or equivalent) so that two workers can
/// never claim the same entry.
pub trait WorkQueue: Send + Sync + Clone {
    /// Insert a pending entry for the organization.
    ///
    /// Returns `None` without inserting when a pending or processing
    /// entry for that organization already exists (at most one live entry
    /// per organization).
    fn enqueue(
        &self,
        organization_id: Uuid,
    ) -> impl Future<Output = Result<Option<QueueEntry>, AppError>> + Send;

    /// Atomically claim the oldest pending entry: transition it to
    /// processing and stamp `last_attempt_at`.
    ///
    /// Returns `None` if nothing is pending.
    fn claim_next(&self) -> impl Future<Output = Result<Option<QueueEntry>, AppError>> + Send;

    fn complete(&self, entry_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Mark an entry failed, incrementing its retry count. Once the
    /// cumulative count reaches `max_failures`, the owning organization
    /// is flagged problematic. Returns the updated entry.
    ///
    /// Failed entries are not re-enqueued here; the next scheduling pass
    /// decides whether the organization is retried.
    fn fail(
        &self,
        entry_id: Uuid,
        error: &str,
        max_failures: u32,
    ) -> impl Future<Output = Result<QueueEntry, AppError>> + Send;

    fn get(
        &self,
        entry_id: Uuid,
    ) -> impl Future<Output = Result<Option<QueueEntry>, AppError>> + Send;

    fn count_by_status(
        &self,
        status: QueueStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Processing entries whose `last_attempt_at` is older than
    /// `threshold`; their worker presumably crashed mid-job.
    fn list_stuck(
        &self,
        threshold: Duration,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, AppError>> + Send;

    /// Reset stuck processing entries to pending. Returns how many were
    /// reset.
    fn reset_stuck(
        &self,
        threshold: Duration,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}
