use super::{PipelineStep, StepResult};
use crate::constants::{CLEAN_STEP, INGEST_STEP, RAW_PATH_KEY, TRUSTED_PATH_KEY};
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::context::RunContext;
use crate::table::{filter_not_null, preview, read_parquet, write_parquet, Codec, WrittenFile};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone)]
pub struct CleanReport {
    pub rows_in: usize,
    pub rows_kept: usize,
    pub written: WrittenFile,
}

/// Keep the rows of `raw` whose `birth_date_column` is non-null and write
/// them to `destination`. An empty result is still written.
pub fn raw_to_trusted(
    raw: &Path,
    destination: &Path,
    codec: Codec,
    birth_date_column: &str,
) -> Result<CleanReport> {
    let batch = read_parquet(raw)?;
    if tracing::enabled!(tracing::Level::DEBUG) {
        debug!("Raw input preview:\n{}", preview(&batch, 5)?);
    }

    let kept = filter_not_null(&batch, birth_date_column, raw)?;
    metrics::clean::rows_filtered(batch.num_rows(), kept.num_rows());

    let written = write_parquet(&kept, destination, codec)?;
    info!(
        rows_in = batch.num_rows(),
        rows_kept = kept.num_rows(),
        "Cleaned {} into {}",
        raw.display(),
        destination.display()
    );
    Ok(CleanReport {
        rows_in: batch.num_rows(),
        rows_kept: kept.num_rows(),
        written,
    })
}

/// Pipeline step wrapping [`raw_to_trusted`]; reads `raw_path` from the
/// ingest step and publishes `trusted_path`
pub struct CleanStep {
    destination: PathBuf,
    codec: Codec,
    birth_date_column: String,
}

impl CleanStep {
    pub fn new(destination: PathBuf, codec: Codec, birth_date_column: String) -> Self {
        Self {
            destination,
            codec,
            birth_date_column,
        }
    }
}

#[async_trait]
impl PipelineStep for CleanStep {
    #[instrument(skip_all, fields(run_id = %ctx.run_id()))]
    async fn execute(&self, ctx: &RunContext) -> Result<StepResult> {
        let raw = PathBuf::from(ctx.pull(INGEST_STEP, RAW_PATH_KEY)?);
        let report = raw_to_trusted(&raw, &self.destination, self.codec, &self.birth_date_column)?;
        let removed = report.rows_in - report.rows_kept;
        let message = format!(
            "Clean kept {} of {} rows with {} present",
            report.rows_kept, report.rows_in, self.birth_date_column
        );
        Ok(StepResult::success(report.rows_kept, message)
            .with_dropped(removed)
            .publish(TRUSTED_PATH_KEY, self.destination.to_string_lossy())
            .with_output(report.written))
    }

    fn step_name(&self) -> &'static str {
        CLEAN_STEP
    }
}
