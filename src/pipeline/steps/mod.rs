use crate::error::Result;
use crate::pipeline::context::RunContext;
use crate::table::WrittenFile;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Common trait for all pipeline steps
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Execute this step against the values published so far in the run
    async fn execute(&self, ctx: &RunContext) -> Result<StepResult>;

    /// Get the name of this pipeline step
    fn step_name(&self) -> &'static str;
}

/// Result of executing a pipeline step
#[derive(Debug, Clone, Default)]
pub struct StepResult {
    pub processed_count: usize,
    pub dropped_count: usize,
    pub message: String,
    /// Values this step hands to later steps, keyed under its own name
    pub published: Vec<(String, String)>,
    pub output: Option<WrittenFile>,
    pub metadata: BTreeMap<String, String>,
}

impl StepResult {
    pub fn success(processed: usize, message: String) -> Self {
        Self {
            processed_count: processed,
            message,
            ..Default::default()
        }
    }

    pub fn with_dropped(mut self, dropped: usize) -> Self {
        self.dropped_count = dropped;
        self
    }

    pub fn publish(mut self, key: &str, value: impl Into<String>) -> Self {
        self.published.push((key.to_string(), value.into()));
        self
    }

    pub fn with_output(mut self, written: WrittenFile) -> Self {
        self.output = Some(written);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

pub mod aggregate;
pub mod clean;
pub mod ingest;
pub mod prepare_dirs;

pub use aggregate::{trusted_to_refined, AggregateReport, AggregateStep, GroupingSpec};
pub use clean::{raw_to_trusted, CleanReport, CleanStep};
pub use ingest::{csv_to_raw, IngestReport, IngestStep};
pub use prepare_dirs::{prepare_directories, PrepareDirsStep};
