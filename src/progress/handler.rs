//! Progress handler trait and events

use crate::recipe::StageRole;
use std::time::Duration;

/// Events emitted while a recipe runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Pipeline started for a build context
    Started { context: String },

    /// Recipe assembled and validated
    Planned {
        builder_steps: usize,
        runtime_steps: usize,
    },

    /// Non-fatal problem worth surfacing (manifest lint, missing entry file)
    Warning { message: String },

    /// Stage handed to the executor
    StageStarted { stage: StageRole },

    /// Executor reached a step inside a stage
    StepStarted {
        stage: StageRole,
        index: usize,
        total: usize,
        label: String,
    },

    /// Raw output line from the executor
    Output { stage: StageRole, line: String },

    /// Stage finished and produced its artifact
    StageCompleted {
        stage: StageRole,
        artifact: String,
        duration: Duration,
    },

    /// Stage failed; later stages will not run
    StageFailed {
        stage: StageRole,
        step: String,
        error: String,
    },

    /// Final image produced
    Completed {
        image: String,
        total_time: Duration,
    },

    /// Pipeline aborted
    Failed { error: String },
}

/// Trait for handling progress events during a build
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
