//! Stage-by-stage execution of a recipe
//!
//! The orchestrator drives the builder stage, then the runtime stage, through
//! a [`StageExecutor`]. Stages run strictly in sequence and the first failure
//! aborts the run.

mod executor;
mod orchestrator;
mod plan;
mod report;
mod state;

pub use executor::{PlanningExecutor, StageExecutor, StageOutput, StageRequest};
pub use orchestrator::PipelineOrchestrator;
pub use plan::{
    Plan, LABEL_BUILDER_DIGEST, LABEL_CREATED, LABEL_MANIFEST_DIGEST, LABEL_VERSION,
};
pub use report::{BuildFailure, BuildReport, StageReport};
pub use state::{PipelineState, StageState, StageStatus};
