use crate::config::Config;
use crate::constants::{
    Tier, AGGREGATE_STEP, CLEAN_STEP, INGEST_STEP, PREPARE_DIRS_STEP,
};
use crate::error::{PipelineError, Result};
use crate::table::Codec;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a complete pipeline execution
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub name: String,
    pub description: String,
    pub steps: Vec<PipelineStepConfig>,
    pub retry: RetryPolicy,
}

/// Configuration for individual pipeline steps
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStepConfig {
    PrepareDirectories {
        dirs: Vec<PathBuf>,
    },
    Ingest {
        source: PathBuf,
        delimiter: u8,
        destination: PathBuf,
        compression: Codec,
    },
    Clean {
        destination: PathBuf,
        compression: Codec,
        birth_date_column: String,
    },
    Aggregate {
        destination: PathBuf,
        compression: Codec,
        municipality_column: String,
        age_column: String,
        top_n: usize,
    },
}

/// Flat retry count with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}

impl PipelineConfig {
    /// The four-step prepare → ingest → clean → aggregate pipeline
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = &config.storage;
        let codec = storage.compression;
        let steps = vec![
            PipelineStepConfig::PrepareDirectories {
                dirs: Tier::ALL.iter().map(|t| storage.tier_dir(*t)).collect(),
            },
            PipelineStepConfig::Ingest {
                source: storage.source_path(),
                delimiter: storage.delimiter_byte()?,
                destination: storage.tier_file(Tier::Raw),
                compression: codec,
            },
            PipelineStepConfig::Clean {
                destination: storage.tier_file(Tier::Trusted),
                compression: codec,
                birth_date_column: config.columns.birth_date.clone(),
            },
            PipelineStepConfig::Aggregate {
                destination: storage.tier_file(Tier::Refined),
                compression: codec,
                municipality_column: config.columns.municipality.clone(),
                age_column: config.columns.age.clone(),
                top_n: config.columns.top_n,
            },
        ];

        Ok(Self {
            name: config.dag.dag_id.clone(),
            description: "Ingest, clean and aggregate case notifications".to_string(),
            steps,
            retry: RetryPolicy {
                retries: config.dag.retries,
                delay: Duration::from_secs(config.dag.retry_delay_secs),
            },
        })
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(PipelineError::Config(
                "Pipeline must have at least one step".into(),
            ));
        }

        let mut seen_steps = HashSet::new();
        for step in &self.steps {
            let step_name = step.step_name();
            if !seen_steps.insert(step_name) {
                return Err(PipelineError::Config(format!(
                    "Step '{}' appears more than once",
                    step_name
                )));
            }
            for dep in step.dependencies() {
                if !seen_steps.contains(dep) {
                    return Err(PipelineError::Config(format!(
                        "Step '{}' depends on '{}' which does not run before it",
                        step_name, dep
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn step(&self, name: &str) -> Option<&PipelineStepConfig> {
        self.steps.iter().find(|s| s.step_name() == name)
    }
}

impl PipelineStepConfig {
    pub fn step_name(&self) -> &'static str {
        match self {
            PipelineStepConfig::PrepareDirectories { .. } => PREPARE_DIRS_STEP,
            PipelineStepConfig::Ingest { .. } => INGEST_STEP,
            PipelineStepConfig::Clean { .. } => CLEAN_STEP,
            PipelineStepConfig::Aggregate { .. } => AGGREGATE_STEP,
        }
    }

    pub fn dependencies(&self) -> Vec<&'static str> {
        match self {
            PipelineStepConfig::PrepareDirectories { .. } => vec![],
            PipelineStepConfig::Ingest { .. } => vec![PREPARE_DIRS_STEP],
            PipelineStepConfig::Clean { .. } => vec![INGEST_STEP],
            PipelineStepConfig::Aggregate { .. } => vec![CLEAN_STEP],
        }
    }
}
