use super::{PipelineStep, StepResult};
use crate::constants::PREPARE_DIRS_STEP;
use crate::error::Result;
use crate::pipeline::context::RunContext;
use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Create every directory in `dirs`, including parents. Existing
/// directories are left alone.
pub fn prepare_directories(dirs: &[PathBuf]) -> Result<usize> {
    let mut created = 0;
    for dir in dirs {
        if !dir.is_dir() {
            created += 1;
        }
        fs::create_dir_all(dir)?;
        debug!("Ensured directory {}", dir.display());
    }
    Ok(created)
}

/// Pipeline step that ensures the tier directories exist
pub struct PrepareDirsStep {
    dirs: Vec<PathBuf>,
}

impl PrepareDirsStep {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

#[async_trait]
impl PipelineStep for PrepareDirsStep {
    #[instrument(skip_all, fields(run_id = %ctx.run_id()))]
    async fn execute(&self, ctx: &RunContext) -> Result<StepResult> {
        let created = prepare_directories(&self.dirs)?;
        let message = format!(
            "{} tier directories ready ({} created)",
            self.dirs.len(),
            created
        );
        info!("{}", message);
        Ok(StepResult::success(self.dirs.len(), message).with_metadata("created", created))
    }

    fn step_name(&self) -> &'static str {
        PREPARE_DIRS_STEP
    }
}
