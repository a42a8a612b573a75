use super::ledger::RunLedger;
use super::schedule::{midnight, Schedule};
use crate::config::{Config, DagConfig};
use crate::error::Result;
use crate::pipeline::{PipelineConfig, PipelineExecutionResult, PipelineOrchestrator, RunContext};
use chrono::{DateTime, Utc};
use std::future::Future;
use tracing::{info, warn};

/// Decides which logical dates are due and runs the pipeline for each,
/// recording every run in the ledger.
pub struct Scheduler {
    dag: DagConfig,
    orchestrator: PipelineOrchestrator,
    ledger: RunLedger,
}

impl Scheduler {
    pub fn new(config: &Config) -> Result<Self> {
        let orchestrator = PipelineOrchestrator::new(PipelineConfig::from_config(config)?)?;
        let ledger = RunLedger::open_at(config.storage.ledger_path())?;
        Ok(Self::with_parts(config.dag.clone(), orchestrator, ledger))
    }

    pub fn with_parts(dag: DagConfig, orchestrator: PipelineOrchestrator, ledger: RunLedger) -> Self {
        Self {
            dag,
            orchestrator,
            ledger,
        }
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn schedule(&self) -> Schedule {
        self.dag.schedule
    }

    fn start(&self) -> DateTime<Utc> {
        midnight(self.dag.start_date)
    }

    /// Logical dates due at `now` that have no finished run yet, oldest first.
    /// Without catchup only the most recent due date is considered.
    pub fn pending_runs(&self, now: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let due = if self.dag.catchup {
            self.dag.schedule.due_logical_dates(self.start(), now)
        } else {
            self.dag.schedule.latest_due(self.start(), now).into_iter().collect()
        };

        let mut pending = Vec::with_capacity(due.len());
        for date in due {
            if !self.ledger.is_terminal(&self.dag.dag_id, date)? {
                pending.push(date);
            }
        }
        Ok(pending)
    }

    /// Run the pipeline for one logical date, regardless of earlier runs
    pub async fn run_once(&mut self, logical_date: DateTime<Utc>) -> Result<PipelineExecutionResult> {
        let ctx = RunContext::new(self.dag.dag_id.clone(), logical_date);
        self.ledger.begin_run(&ctx)?;
        let result = self.orchestrator.run_pipeline(ctx).await;
        self.ledger.finish_run(&result)?;
        Ok(result)
    }

    /// Run everything pending at `now`. A failed run does not stop later
    /// dates from running.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<PipelineExecutionResult>> {
        let pending = self.pending_runs(now)?;
        if pending.is_empty() {
            info!("⏳ No runs due for '{}'", self.dag.dag_id);
            return Ok(Vec::new());
        }

        info!("📅 {} run(s) due for '{}'", pending.len(), self.dag.dag_id);
        let mut results = Vec::with_capacity(pending.len());
        for date in pending {
            results.push(self.run_once(date).await?);
        }
        Ok(results)
    }

    /// Run every logical date in `[from, to]` that has not already succeeded
    pub async fn backfill(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PipelineExecutionResult>> {
        let dates = self.dag.schedule.logical_dates_between(from, to);
        info!(
            "🔁 Backfilling {} logical date(s) for '{}'",
            dates.len(),
            self.dag.dag_id
        );

        let mut results = Vec::new();
        for date in dates {
            let state = self.ledger.state_of(&self.dag.dag_id, date)?;
            if state == Some(super::ledger::RunState::Success) {
                info!("⏭️ Skipping {}: already succeeded", date);
                continue;
            }
            results.push(self.run_once(date).await?);
        }
        Ok(results)
    }

    /// Tick until `shutdown` resolves or the schedule has no future runs
    pub async fn run_forever<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let now = Utc::now();
            for result in self.tick(now).await? {
                if !result.success {
                    warn!(
                        "Run {} for {} failed",
                        result.run_id_string(),
                        result.context.logical_date()
                    );
                }
            }

            let Some(next) = self.dag.schedule.next_fire_time(self.start(), Utc::now()) else {
                info!("🏁 Schedule '{}' has no further runs", self.dag.schedule);
                return Ok(());
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            info!("💤 Next run at {} (in {:?})", next, wait);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested, stopping scheduler");
                    return Ok(());
                }
            }
        }
    }
}
