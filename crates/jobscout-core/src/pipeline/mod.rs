//! Ordered pipeline executor.
//!
//! Stages run strictly in insertion order against one shared context.
//! A stage may be skipped when its output already exists, fails its run
//! when validation or execution errors, and gets a best-effort error hook
//! either way. Whether a failure aborts the run or lets the remaining
//! stages proceed is the engine's `continue_on_error` policy; a global
//! wall-clock timeout bounds the whole run.

pub mod context;
pub mod stages;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;
pub use context::PipelineContext;

/// One processing stage in the pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    /// True when the stage's output already exists in the context.
    fn can_skip(&self, _ctx: &PipelineContext) -> bool {
        false
    }

    /// Check preconditions; an error here counts as a stage failure.
    fn validate(&self, _ctx: &PipelineContext) -> Result<(), AppError> {
        Ok(())
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), AppError>;

    /// Best-effort failure hook: log diagnostics and optionally degrade
    /// the context (e.g. substitute an empty result) so later stages can
    /// proceed.
    async fn on_error(&self, _error: &AppError, _ctx: &mut PipelineContext) {}
}

/// Engine policy knobs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Keep running later stages after a failure instead of aborting.
    pub continue_on_error: bool,
    /// Honor stages' `can_skip`.
    pub allow_skipping: bool,
    /// Wall-clock ceiling for the whole run.
    pub timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            allow_skipping: true,
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Executed,
    Skipped,
    Failed,
}

/// Outcome of one stage within a run.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub stage: &'static str,
    pub status: StageStatus,
    pub elapsed: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub total_stages: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Final context plus per-stage accounting for one run.
///
/// `error` is set when the run aborted at a failing stage; the records
/// collected up to that point are retained either way.
#[derive(Debug)]
pub struct PipelineRun {
    pub context: PipelineContext,
    pub summary: PipelineSummary,
    pub stage_records: Vec<StageRecord>,
    pub error: Option<AppError>,
}

impl PipelineRun {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Convert an aborted run into its abort error.
    pub fn into_result(mut self) -> Result<Self, AppError> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Executes an ordered list of stages against a context.
pub struct PipelineEngine {
    stages: Vec<Box<dyn PipelineStage>>,
    options: PipelineOptions,
}

impl PipelineEngine {
    pub fn new(options: PipelineOptions) -> Self {
        Self {
            stages: Vec::new(),
            options,
        }
    }

    pub fn add_stage(mut self, stage: Box<dyn PipelineStage>) -> Self {
        tracing::debug!(stage = stage.name(), "Added pipeline stage");
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run all stages. The whole run is bounded by `options.timeout`; on
    /// expiry the context is lost and the run fails with a timeout error.
    pub async fn execute(&self, ctx: PipelineContext) -> Result<PipelineRun, AppError> {
        let timeout = self.options.timeout;
        match tokio::time::timeout(timeout, self.run_stages(ctx)).await {
            Ok(run) => Ok(run),
            Err(_) => {
                tracing::error!(
                    timeout_secs = timeout.as_secs(),
                    "Pipeline execution timed out"
                );
                Err(AppError::Timeout(timeout.as_secs()))
            }
        }
    }

    async fn run_stages(&self, mut ctx: PipelineContext) -> PipelineRun {
        let run_start = tokio::time::Instant::now();
        let mut records: Vec<StageRecord> = Vec::with_capacity(self.stages.len());
        let mut summary = PipelineSummary {
            total_stages: self.stages.len(),
            ..Default::default()
        };
        let mut abort: Option<AppError> = None;

        tracing::info!(stages = self.stages.len(), "Starting pipeline execution");

        for (index, stage) in self.stages.iter().enumerate() {
            let stage_start = tokio::time::Instant::now();
            tracing::info!(
                stage = stage.name(),
                position = format!("{}/{}", index + 1, self.stages.len()),
                "Running stage"
            );

            if self.options.allow_skipping && stage.can_skip(&ctx) {
                tracing::info!(stage = stage.name(), "Skipping stage");
                records.push(StageRecord {
                    stage: stage.name(),
                    status: StageStatus::Skipped,
                    elapsed: Duration::ZERO,
                    error: None,
                });
                summary.skipped += 1;
                continue;
            }

            let result = match stage.validate(&ctx) {
                Ok(()) => stage.execute(&mut ctx).await,
                Err(e) => Err(e),
            };
            let elapsed = stage_start.elapsed();

            match result {
                Ok(()) => {
                    records.push(StageRecord {
                        stage: stage.name(),
                        status: StageStatus::Executed,
                        elapsed,
                        error: None,
                    });
                    summary.executed += 1;
                    tracing::info!(
                        stage = stage.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Stage completed"
                    );
                }
                Err(error) => {
                    tracing::error!(stage = stage.name(), error = %error, "Stage failed");
                    records.push(StageRecord {
                        stage: stage.name(),
                        status: StageStatus::Failed,
                        elapsed,
                        error: Some(error.to_string()),
                    });
                    summary.failed += 1;

                    stage.on_error(&error, &mut ctx).await;

                    if !self.options.continue_on_error {
                        abort = Some(AppError::PipelineAborted {
                            stage: stage.name().to_string(),
                            message: error.to_string(),
                        });
                        break;
                    }
                }
            }
        }

        summary.elapsed = run_start.elapsed();
        tracing::info!(
            executed = summary.executed,
            skipped = summary.skipped,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            aborted = abort.is_some(),
            "Pipeline execution finished"
        );

        PipelineRun {
            context: ctx,
            summary,
            stage_records: records,
            error: abort,
        }
    }
}
