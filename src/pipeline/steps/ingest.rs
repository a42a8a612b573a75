use super::{PipelineStep, StepResult};
use crate::constants::{INGEST_STEP, RAW_PATH_KEY};
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::context::RunContext;
use crate::table::{read_delimited, write_parquet, Codec, CsvReadReport, WrittenFile};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub read: CsvReadReport,
    pub written: WrittenFile,
}

/// Read the delimited `source` permissively and write it as a columnar file
/// at `destination`.
pub fn csv_to_raw(
    source: &Path,
    delimiter: u8,
    destination: &Path,
    codec: Codec,
) -> Result<IngestReport> {
    let (batch, read) = read_delimited(source, delimiter)?;
    metrics::ingest::rows_read(read.rows_read);
    metrics::ingest::rows_dropped(read.rows_dropped);

    let written = write_parquet(&batch, destination, codec)?;
    info!(
        rows = written.rows,
        dropped = read.rows_dropped,
        padded = read.rows_padded,
        "Ingested {} into {}",
        source.display(),
        destination.display()
    );
    Ok(IngestReport { read, written })
}

/// Pipeline step wrapping [`csv_to_raw`]; publishes `raw_path`
pub struct IngestStep {
    source: PathBuf,
    delimiter: u8,
    destination: PathBuf,
    codec: Codec,
}

impl IngestStep {
    pub fn new(source: PathBuf, delimiter: u8, destination: PathBuf, codec: Codec) -> Self {
        Self {
            source,
            delimiter,
            destination,
            codec,
        }
    }
}

#[async_trait]
impl PipelineStep for IngestStep {
    #[instrument(skip_all, fields(run_id = %ctx.run_id(), source = %self.source.display()))]
    async fn execute(&self, ctx: &RunContext) -> Result<StepResult> {
        let report = csv_to_raw(&self.source, self.delimiter, &self.destination, self.codec)?;
        let message = format!(
            "Ingest wrote {} rows ({} malformed dropped) to {}",
            report.written.rows,
            report.read.rows_dropped,
            self.destination.display()
        );
        Ok(StepResult::success(report.written.rows, message)
            .with_dropped(report.read.rows_dropped)
            .with_metadata("rows_padded", report.read.rows_padded)
            .publish(RAW_PATH_KEY, self.destination.to_string_lossy())
            .with_output(report.written))
    }

    fn step_name(&self) -> &'static str {
        INGEST_STEP
    }
}
