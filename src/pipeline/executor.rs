use crate::context::BuildContext;
use crate::digest::Digest;
use crate::error::BuildError;
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::recipe::{Recipe, StageRole};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Everything an executor needs to produce one stage
pub struct StageRequest<'a> {
    pub stage: StageRole,
    pub recipe: &'a Recipe,
    pub dockerfile: &'a str,
    pub context: &'a BuildContext,
    pub digest: &'a Digest,
    /// Only the runtime stage is ever tagged
    pub tag: Option<&'a str>,
    pub labels: &'a BTreeMap<String, String>,
    pub no_cache: bool,
    pub progress: &'a dyn ProgressHandler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    /// Image id (or planned identity) of the stage's filesystem
    pub artifact: String,
}

/// Backend that turns one stage of a recipe into an artifact
#[async_trait]
pub trait StageExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, request: &StageRequest<'_>) -> Result<StageOutput, BuildError>;
}

/// Walks the steps without touching a daemon; artifacts are the stage digests
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanningExecutor;

#[async_trait]
impl StageExecutor for PlanningExecutor {
    fn name(&self) -> &'static str {
        "plan"
    }

    async fn execute(&self, request: &StageRequest<'_>) -> Result<StageOutput, BuildError> {
        let steps = &request.recipe.stage(request.stage).steps;
        for (idx, step) in steps.iter().enumerate() {
            request.progress.on_progress(&ProgressEvent::StepStarted {
                stage: request.stage,
                index: idx + 1,
                total: steps.len(),
                label: step.label(),
            });
        }
        Ok(StageOutput {
            artifact: request.digest.to_string(),
        })
    }
}
