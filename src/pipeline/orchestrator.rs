use super::context::RunContext;
use super::pipeline_config::{PipelineConfig, PipelineStepConfig};
use super::steps::{
    AggregateStep, CleanStep, GroupingSpec, IngestStep, PipelineStep, PrepareDirsStep, StepResult,
};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Runs the configured steps in order, retrying each a flat number of times
pub struct PipelineOrchestrator {
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run every step for one logical date. Steps after a failed step are
    /// not started.
    pub async fn run_pipeline(&self, ctx: RunContext) -> PipelineExecutionResult {
        info!(
            "🚀 Starting pipeline '{}' run {} for {}",
            self.config.name,
            ctx.run_id(),
            ctx.logical_date()
        );
        info!("📋 {}", self.config.description);

        let mut execution = PipelineExecutionResult::new(&self.config.name, &ctx);
        let mut ctx = ctx;
        let total = self.config.steps.len();

        for (index, step_config) in self.config.steps.iter().enumerate() {
            let step_name = step_config.step_name();
            if !execution.success {
                execution.steps.push(StepOutcome::upstream_failed(step_name));
                continue;
            }

            info!("🔄 Executing step {}/{}: {}", index + 1, total, step_name);
            let step = Self::create_step(step_config);
            let mut outcome = self.run_with_retries(step.as_ref(), &ctx).await;

            if let Some(result) = &outcome.result {
                match fold_publications(&ctx, step_name, result) {
                    Ok(next) => ctx = next,
                    Err(e) => {
                        error!("❌ Step '{}' published invalid state: {}", step_name, e);
                        outcome.status = StepStatus::Failed;
                        outcome.error = Some(e.to_string());
                    }
                }
            }

            if outcome.status != StepStatus::Success {
                execution.success = false;
            }
            execution.steps.push(outcome);
        }

        execution.context = ctx;
        execution.complete();

        if execution.success {
            metrics::runs::succeeded();
            info!(
                "🎉 Pipeline '{}' run {} completed",
                self.config.name, execution.run_id_string()
            );
        } else {
            metrics::runs::failed();
            error!(
                "💥 Pipeline '{}' run {} failed at step '{}'",
                self.config.name,
                execution.run_id_string(),
                execution.failed_step().unwrap_or("unknown")
            );
        }
        execution
    }

    /// Create a step instance from configuration
    pub fn create_step(step_config: &PipelineStepConfig) -> Box<dyn PipelineStep> {
        match step_config.clone() {
            PipelineStepConfig::PrepareDirectories { dirs } => Box::new(PrepareDirsStep::new(dirs)),
            PipelineStepConfig::Ingest {
                source,
                delimiter,
                destination,
                compression,
            } => Box::new(IngestStep::new(source, delimiter, destination, compression)),
            PipelineStepConfig::Clean {
                destination,
                compression,
                birth_date_column,
            } => Box::new(CleanStep::new(destination, compression, birth_date_column)),
            PipelineStepConfig::Aggregate {
                destination,
                compression,
                municipality_column,
                age_column,
                top_n,
            } => Box::new(AggregateStep::new(
                destination,
                compression,
                GroupingSpec {
                    municipality: municipality_column,
                    age: age_column,
                    top_n,
                },
            )),
        }
    }

    async fn run_with_retries(&self, step: &dyn PipelineStep, ctx: &RunContext) -> StepOutcome {
        let step_name = step.step_name();
        let policy = self.config.retry;
        let max_attempts = policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            match step.execute(ctx).await {
                Ok(result) => {
                    let elapsed = started.elapsed();
                    metrics::steps::duration(step_name, elapsed.as_secs_f64());
                    if let Some(written) = &result.output {
                        metrics::steps::output_bytes(step_name, written.bytes);
                    }
                    info!("✅ Step '{}' completed: {}", step_name, result.message);
                    return StepOutcome {
                        step: step_name,
                        status: StepStatus::Success,
                        attempts: attempt,
                        duration: elapsed,
                        result: Some(result),
                        error: None,
                    };
                }
                Err(e) if attempt < max_attempts => {
                    metrics::steps::retry(step_name);
                    warn!(
                        "⚠️ Step '{}' attempt {}/{} failed: {}; retrying in {:?}",
                        step_name, attempt, max_attempts, e, policy.delay
                    );
                    if !policy.delay.is_zero() {
                        tokio::time::sleep(policy.delay).await;
                    }
                }
                Err(e) => {
                    metrics::steps::failure(step_name);
                    error!(
                        "❌ Step '{}' failed after {} attempt(s): {}",
                        step_name, attempt, e
                    );
                    return StepOutcome {
                        step: step_name,
                        status: StepStatus::Failed,
                        attempts: attempt,
                        duration: started.elapsed(),
                        result: None,
                        error: Some(e.to_string()),
                    };
                }
            }
        }
    }
}

fn fold_publications(ctx: &RunContext, step: &str, result: &StepResult) -> Result<RunContext> {
    result
        .published
        .iter()
        .try_fold(ctx.clone(), |acc, (key, value)| acc.with_published(step, key, value))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failed,
    /// Not started because an earlier step failed
    UpstreamFailed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::UpstreamFailed => "upstream_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step: &'static str,
    pub status: StepStatus,
    pub attempts: u32,
    pub duration: Duration,
    pub result: Option<StepResult>,
    pub error: Option<String>,
}

impl StepOutcome {
    fn upstream_failed(step: &'static str) -> Self {
        Self {
            step,
            status: StepStatus::UpstreamFailed,
            attempts: 0,
            duration: Duration::ZERO,
            result: None,
            error: None,
        }
    }
}

/// Result of executing a complete pipeline
#[derive(Debug, Clone)]
pub struct PipelineExecutionResult {
    pub pipeline_name: String,
    pub success: bool,
    pub steps: Vec<StepOutcome>,
    /// Context as it stood after the last successful step
    pub context: RunContext,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineExecutionResult {
    pub fn new(pipeline_name: &str, ctx: &RunContext) -> Self {
        Self {
            pipeline_name: pipeline_name.to_string(),
            success: true,
            steps: Vec::new(),
            context: ctx.clone(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }

    pub fn run_id_string(&self) -> String {
        self.context.run_id().to_string()
    }

    pub fn failed_step(&self) -> Option<&'static str> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .map(|s| s.step)
    }

    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step)
    }

    /// Turn a failed run into an error naming the failing step
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        let failed = self.steps.iter().find(|s| s.status == StepStatus::Failed);
        Err(PipelineError::StepFailed {
            step: failed.map(|s| s.step).unwrap_or("unknown").to_string(),
            attempts: failed.map(|s| s.attempts).unwrap_or(0),
            message: failed
                .and_then(|s| s.error.clone())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::constants::{AGGREGATE_STEP, CLEAN_STEP, INGEST_STEP, RAW_PATH_KEY};
    use std::fs;
    use tempfile::tempdir;

    fn config_in(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.data_root = root.to_path_buf();
        config.dag.retry_delay_secs = 0;
        config
    }

    #[tokio::test]
    async fn missing_source_fails_ingest_after_retry_and_skips_rest() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());
        let orchestrator =
            PipelineOrchestrator::new(PipelineConfig::from_config(&config).unwrap()).unwrap();

        let result = orchestrator
            .run_pipeline(RunContext::new("dag", Utc::now()))
            .await;

        assert!(!result.success);
        assert_eq!(result.failed_step(), Some(INGEST_STEP));
        assert_eq!(result.outcome(INGEST_STEP).unwrap().attempts, 2);
        assert_eq!(
            result.outcome(CLEAN_STEP).unwrap().status,
            StepStatus::UpstreamFailed
        );
        assert_eq!(
            result.outcome(AGGREGATE_STEP).unwrap().status,
            StepStatus::UpstreamFailed
        );
        assert!(matches!(
            result.into_result(),
            Err(PipelineError::StepFailed { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn retries_are_configurable() {
        let root = tempdir().unwrap();
        let mut config = config_in(root.path());
        config.dag.retries = 3;
        let orchestrator =
            PipelineOrchestrator::new(PipelineConfig::from_config(&config).unwrap()).unwrap();

        let result = orchestrator
            .run_pipeline(RunContext::new("dag", Utc::now()))
            .await;
        assert_eq!(result.outcome(INGEST_STEP).unwrap().attempts, 4);
    }

    #[tokio::test]
    async fn successful_run_threads_paths_through_context() {
        let root = tempdir().unwrap();
        let config = config_in(root.path());
        fs::write(
            config.storage.source_path(),
            "ID_MUNICIP;NU_IDADE_N;DT_NASC\n1;30;01/01/1991\n1;30;\n2;40;02/02/1981\n",
        )
        .unwrap();
        let orchestrator =
            PipelineOrchestrator::new(PipelineConfig::from_config(&config).unwrap()).unwrap();

        let result = orchestrator
            .run_pipeline(RunContext::new("dag", Utc::now()))
            .await
            .into_result()
            .unwrap();

        assert!(result.steps.iter().all(|s| s.attempts == 1));
        let raw = result.context.pull(INGEST_STEP, RAW_PATH_KEY).unwrap();
        assert!(raw.ends_with("covid_raw.parquet"));
        assert_eq!(result.outcome(CLEAN_STEP).unwrap().result.as_ref().unwrap().processed_count, 2);
    }
}
