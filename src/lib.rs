pub mod config;
pub mod constants;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod scheduler;
pub mod table;

pub use config::Config;
pub use error::{PipelineError, Result};
