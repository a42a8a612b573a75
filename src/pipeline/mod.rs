// Pipeline: run context, step implementations and the orchestrator that
// runs them in order.

pub mod context;
pub mod orchestrator;
pub mod pipeline_config;
pub mod steps;

pub use context::RunContext;
pub use orchestrator::{PipelineExecutionResult, PipelineOrchestrator, StepOutcome, StepStatus};
pub use pipeline_config::{PipelineConfig, PipelineStepConfig, RetryPolicy};
pub use steps::{PipelineStep, StepResult};
