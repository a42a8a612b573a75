use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Run ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Input file '{}' has no header line", .0.display())]
    EmptyInput(PathBuf),

    #[error("Column '{column}' not found in '{}'", .path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("No value published by step '{step}' under key '{key}'")]
    MissingUpstreamValue { step: String, key: String },

    #[error("Step '{step}' already published key '{key}' in this run")]
    DuplicatePublish { step: String, key: String },

    #[error("Unsupported compression codec: {0}")]
    UnsupportedCompression(String),

    #[error("Invalid schedule interval: {0}")]
    InvalidSchedule(String),

    #[error("Step '{step}' failed after {attempts} attempt(s): {message}")]
    StepFailed {
        step: String,
        attempts: u32,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
