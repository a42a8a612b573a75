use super::{PipelineStep, StepResult};
use crate::constants::{AGGREGATE_STEP, CLEAN_STEP, REFINED_PATH_KEY, TRUSTED_PATH_KEY};
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::context::RunContext;
use crate::table::{group_count_top_n, read_parquet, write_parquet, Codec, WrittenFile};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub rows_in: usize,
    pub distinct_groups: usize,
    pub written: WrittenFile,
}

/// Columns and limit for the group count
#[derive(Debug, Clone)]
pub struct GroupingSpec {
    pub municipality: String,
    pub age: String,
    pub top_n: usize,
}

/// Count (municipality, age) pairs in `trusted`, keep the `top_n` most
/// frequent and write them to `destination`.
pub fn trusted_to_refined(
    trusted: &Path,
    destination: &Path,
    codec: Codec,
    grouping: &GroupingSpec,
) -> Result<AggregateReport> {
    let batch = read_parquet(trusted)?;
    let (top, distinct_groups) = group_count_top_n(
        &batch,
        &grouping.municipality,
        &grouping.age,
        grouping.top_n,
        trusted,
    )?;
    metrics::aggregate::groups_computed(distinct_groups, top.num_rows());

    let written = write_parquet(&top, destination, codec)?;
    info!(
        rows_in = batch.num_rows(),
        distinct_groups,
        rows_written = written.rows,
        "Aggregated {} into {}",
        trusted.display(),
        destination.display()
    );
    Ok(AggregateReport {
        rows_in: batch.num_rows(),
        distinct_groups,
        written,
    })
}

/// Pipeline step wrapping [`trusted_to_refined`]; reads `trusted_path` from
/// the clean step
pub struct AggregateStep {
    destination: PathBuf,
    codec: Codec,
    grouping: GroupingSpec,
}

impl AggregateStep {
    pub fn new(destination: PathBuf, codec: Codec, grouping: GroupingSpec) -> Self {
        Self {
            destination,
            codec,
            grouping,
        }
    }
}

#[async_trait]
impl PipelineStep for AggregateStep {
    #[instrument(skip_all, fields(run_id = %ctx.run_id()))]
    async fn execute(&self, ctx: &RunContext) -> Result<StepResult> {
        let trusted = PathBuf::from(ctx.pull(CLEAN_STEP, TRUSTED_PATH_KEY)?);
        let report = trusted_to_refined(&trusted, &self.destination, self.codec, &self.grouping)?;
        let message = format!(
            "Aggregate wrote top {} of {} groups to {}",
            report.written.rows,
            report.distinct_groups,
            self.destination.display()
        );
        Ok(StepResult::success(report.written.rows, message)
            .with_metadata("distinct_groups", report.distinct_groups)
            .publish(REFINED_PATH_KEY, self.destination.to_string_lossy())
            .with_output(report.written))
    }

    fn step_name(&self) -> &'static str {
        AGGREGATE_STEP
    }
}
