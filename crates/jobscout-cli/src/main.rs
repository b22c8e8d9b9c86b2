use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jobscout_client::{
    DriveCvExtractor, GeminiClient, ReqwestPageFetcher, ThrottleConfig, ThrottledPageFetcher,
};
use jobscout_core::schedule;
use jobscout_core::traits::OrganizationStore;
use jobscout_core::work_queue::WorkQueue;
use jobscout_core::worker::{TracingWorkerReporter, WorkerProfile};
use jobscout_core::{MatchService, ModelLimits, QueueStatus, QueueWorker, WorkerConfig};
use jobscout_db::{Database, DatabaseConfig, NewOrganization};

#[derive(Parser)]
#[command(name = "jobscout", version, about = "Careers-page scout and job-matching engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an organization for tracking
    Track {
        /// Organization name
        #[arg(short, long)]
        name: String,

        /// Careers page URL
        #[arg(short, long)]
        careers_url: String,

        /// Tracking rank, 1-100 (higher = rechecked more often)
        #[arg(short, long)]
        rank: i32,
    },

    /// Enqueue scrape jobs for every organization that is due
    Enqueue {
        /// Cap on how many jobs one pass may insert
        #[arg(long, default_value_t = schedule::DEFAULT_MAX_ENQUEUE)]
        max_jobs: usize,
    },

    /// Run the queue worker
    Worker {
        /// Drain the queue once and exit instead of polling forever
        #[arg(long, default_value_t = false)]
        drain: bool,

        /// Jobs processed concurrently per poll cycle
        #[arg(long, default_value_t = 5)]
        batch_size: usize,

        /// Seconds to sleep when the queue is empty
        #[arg(long, default_value_t = 20)]
        poll_interval: u64,

        /// Wall-clock ceiling per job, in seconds
        #[arg(long, default_value_t = 600)]
        job_timeout: u64,

        #[command(flatten)]
        identity: Identity,

        #[command(flatten)]
        inference: Inference,
    },

    /// Show queue counts and stuck entries
    Status,

    /// Run the matching pipeline for specific organizations
    Match {
        /// Organization ids to match against
        #[arg(short, long, required = true, num_args = 1..)]
        organization_ids: Vec<Uuid>,

        #[command(flatten)]
        identity: Identity,

        #[command(flatten)]
        inference: Inference,
    },
}

/// The candidate identity pipeline runs are executed for.
#[derive(clap::Args)]
struct Identity {
    /// User id all saved jobs and history records are scoped to
    #[arg(long, env = "JOBSCOUT_USER_ID")]
    user_id: Uuid,

    /// CV share link (Google Drive or direct URL)
    #[arg(long, env = "JOBSCOUT_CV_URL")]
    cv_url: String,

    /// Path to a JSON file with candidate info
    #[arg(long, env = "JOBSCOUT_CANDIDATE_INFO")]
    candidate_info: PathBuf,
}

#[derive(clap::Args)]
struct Inference {
    /// Inference API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Model to use
    #[arg(long, env = "JOBSCOUT_MODEL", default_value = "gemini-2.0-flash-lite")]
    model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("jobscout=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track {
            name,
            careers_url,
            rank,
        } => {
            schedule::interval_for(rank).map_err(|e| anyhow::anyhow!(e))?;
            let db = connect_db().await?;
            let org = db
                .organization_repo()
                .create(&NewOrganization {
                    name,
                    careers_url,
                    rank,
                })
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!(
                "Tracking {} ({}) — rechecked {}",
                org.name,
                org.id,
                schedule::frequency_description(org.rank)
                    .map_err(|e| anyhow::anyhow!(e))?
                    .to_lowercase()
            );
        }
        Commands::Enqueue { max_jobs } => {
            let db = connect_db().await?;
            let report =
                schedule::enqueue_due_organizations(&db.organization_repo(), &db.queue_repo(), max_jobs)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
            println!(
                "Scanned {} tracked organizations: {} due, {} enqueued, {} already queued",
                report.scanned, report.due, report.enqueued, report.skipped_existing
            );
        }
        Commands::Worker {
            drain,
            batch_size,
            poll_interval,
            job_timeout,
            identity,
            inference,
        } => {
            let db = connect_db().await?;
            let service = build_service(&db, &inference)?;
            let profile = load_profile(&identity)?;

            let config = WorkerConfig::default()
                .with_batch_size(batch_size)
                .with_poll_interval(Duration::from_secs(poll_interval))
                .with_job_timeout(Duration::from_secs(job_timeout));
            let worker = QueueWorker::new(
                db.queue_repo(),
                db.organization_repo(),
                service,
                profile,
                config,
            );

            if drain {
                worker.run_once(&TracingWorkerReporter).await;
            } else {
                let cancel = CancellationToken::new();
                let signal_token = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Stop signal received, finishing in-flight jobs");
                        signal_token.cancel();
                    }
                });
                worker.run(cancel, &TracingWorkerReporter).await;
            }
        }
        Commands::Status => {
            let db = connect_db().await?;
            cmd_status(&db).await?;
        }
        Commands::Match {
            organization_ids,
            identity,
            inference,
        } => {
            let db = connect_db().await?;
            let service = build_service(&db, &inference)?;
            let profile = load_profile(&identity)?;

            let outcomes = service
                .match_organization_batch(&organization_ids, &profile)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;

            for (org_id, outcome) in &outcomes {
                if !outcome.processed {
                    println!(
                        "{org_id}: not processed ({})",
                        outcome.reason.as_deref().unwrap_or("unknown reason")
                    );
                    continue;
                }
                println!("{org_id}: {} new match(es)", outcome.results.len());
                for result in &outcome.results {
                    println!(
                        "  [{:>3}] {} — {}",
                        result.suitability_score, result.title, result.url
                    );
                }
            }
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and run migrations.
async fn connect_db() -> Result<Database> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db)
}

type CliMatchService = MatchService<
    ThrottledPageFetcher<ReqwestPageFetcher>,
    DriveCvExtractor,
    GeminiClient,
    jobscout_db::ScrapeHistoryRepository,
    jobscout_db::SavedJobRepository,
    jobscout_db::OrganizationRepository,
    jobscout_db::TokenUsageRepository,
>;

fn build_service(db: &Database, inference: &Inference) -> Result<CliMatchService> {
    let fetcher = ReqwestPageFetcher::new().map_err(|e| anyhow::anyhow!(e))?;
    let fetcher = ThrottledPageFetcher::new(fetcher, ThrottleConfig::default());
    let cv_extractor = DriveCvExtractor::new().map_err(|e| anyhow::anyhow!(e))?;
    let llm = GeminiClient::new(&inference.api_key, &inference.model)
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(MatchService::new(
        fetcher,
        cv_extractor,
        llm,
        db.history_repo(),
        db.saved_job_repo(),
        db.organization_repo(),
        db.usage_repo(),
        ModelLimits::for_model(&inference.model),
    ))
}

fn load_profile(identity: &Identity) -> Result<WorkerProfile> {
    let raw = std::fs::read_to_string(&identity.candidate_info).with_context(|| {
        format!(
            "Failed to read candidate info file: {}",
            identity.candidate_info.display()
        )
    })?;
    let candidate_info =
        serde_json::from_str(&raw).context("Invalid JSON in candidate info file")?;

    Ok(WorkerProfile {
        user_id: identity.user_id,
        cv_ref: identity.cv_url.clone(),
        candidate_info,
    })
}

async fn cmd_status(db: &Database) -> Result<()> {
    let queue = db.queue_repo();

    println!("Work queue status:");
    for status in [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Completed,
        QueueStatus::Failed,
    ] {
        let count = queue
            .count_by_status(status)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        println!("  {status:>10}: {count}");
    }

    let stuck = queue
        .list_stuck(WorkerConfig::default().stuck_threshold)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    if stuck.is_empty() {
        println!("No stuck entries.");
    } else {
        println!("Stuck entries (processing too long):");
        for entry in stuck {
            let org = db
                .organization_repo()
                .get(entry.organization_id)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!(
                "  {} — organization {} — last attempt {}",
                entry.id,
                org.map(|o| o.name).unwrap_or_else(|| "unknown".into()),
                entry
                    .last_attempt_at
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "never".into()),
            );
        }
    }

    Ok(())
}
