//! Rank-based scrape scheduling.
//!
//! Maps a tracking rank (1-100) to a recheck interval, decides whether an
//! organization is due, and scores how urgently it should be processed.
//! The urgency score grows without bound the longer an organization is
//! neglected, so overdue items eventually win regardless of rank.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::AppError;
use crate::traits::OrganizationStore;
use crate::work_queue::WorkQueue;

/// Upper bound on how many organizations a single enqueue pass inserts.
pub const DEFAULT_MAX_ENQUEUE: usize = 50;

/// Recheck interval for a tracking rank.
///
/// 81-100 daily, 61-80 every 2 days, 31-60 every 3 days, 11-30 every
/// 4 days, 1-10 every 5 days.
pub fn interval_for(rank: i32) -> Result<TimeDelta, AppError> {
    if !(1..=100).contains(&rank) {
        return Err(AppError::Validation(format!(
            "Rank must be between 1 and 100, got {rank}"
        )));
    }
    let days = match rank {
        81..=100 => 1,
        61..=80 => 2,
        31..=60 => 3,
        11..=30 => 4,
        _ => 5,
    };
    Ok(TimeDelta::days(days))
}

/// True if the organization should be scraped now.
///
/// Never-scraped organizations are always due.
pub fn is_due(rank: i32, last_scraped_at: Option<DateTime<Utc>>) -> Result<bool, AppError> {
    is_due_at(rank, last_scraped_at, Utc::now())
}

fn is_due_at(
    rank: i32,
    last_scraped_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let interval = interval_for(rank)?;
    Ok(match last_scraped_at {
        None => true,
        Some(last) => now - last >= interval,
    })
}

/// Urgency score for ordering due organizations.
///
/// Never scraped: the rank itself. Otherwise `rank * max(1, elapsed /
/// interval)` so a neglected high-rank organization outranks a barely-due
/// low-rank one. Intentionally uncapped.
pub fn priority(rank: i32, last_scraped_at: Option<DateTime<Utc>>) -> Result<f64, AppError> {
    priority_at(rank, last_scraped_at, Utc::now())
}

fn priority_at(
    rank: i32,
    last_scraped_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<f64, AppError> {
    let interval = interval_for(rank)?;
    let Some(last) = last_scraped_at else {
        return Ok(rank as f64);
    };
    let elapsed_ms = (now - last).num_milliseconds() as f64;
    let interval_ms = interval.num_milliseconds() as f64;
    let overdue_factor = elapsed_ms / interval_ms;
    Ok(rank as f64 * overdue_factor.max(1.0))
}

/// Human-readable recheck frequency for a rank ("Daily", "Every 3 days").
pub fn frequency_description(rank: i32) -> Result<String, AppError> {
    let days = interval_for(rank)?.num_days();
    Ok(if days == 1 {
        "Daily".to_string()
    } else {
        format!("Every {days} days")
    })
}

/// Outcome of one enqueue scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    pub scanned: usize,
    pub due: usize,
    pub enqueued: usize,
    pub skipped_existing: usize,
}

/// Scan tracked organizations and enqueue the due ones, most urgent first.
///
/// The pass is capped at `max_jobs` insertions. Organizations that
/// already have a pending or processing entry are skipped (the queue
/// enforces at most one live entry per organization).
pub async fn enqueue_due_organizations<O, Q>(
    orgs: &O,
    queue: &Q,
    max_jobs: usize,
) -> Result<EnqueueReport, AppError>
where
    O: OrganizationStore,
    Q: WorkQueue,
{
    let tracked = orgs.list_tracking().await?;
    let mut report = EnqueueReport {
        scanned: tracked.len(),
        ..Default::default()
    };

    let mut due = Vec::new();
    for org in tracked {
        match is_due(org.rank, org.last_successful_scrape_at) {
            Ok(true) => {
                let score = priority(org.rank, org.last_successful_scrape_at)?;
                due.push((org, score));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(organization_id = %org.id, error = %e, "Skipping organization with invalid rank");
            }
        }
    }
    report.due = due.len();

    due.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    for (org, score) in due.into_iter().take(max_jobs) {
        match queue.enqueue(org.id).await? {
            Some(entry) => {
                report.enqueued += 1;
                tracing::debug!(
                    organization = %org.name,
                    rank = org.rank,
                    priority = format!("{score:.2}"),
                    entry_id = %entry.id,
                    "Enqueued scrape job"
                );
            }
            None => {
                report.skipped_existing += 1;
                tracing::debug!(organization = %org.name, "Job already queued, skipping");
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        due = report.due,
        enqueued = report.enqueued,
        "Enqueue pass completed"
    );
    Ok(report)
}
