//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { context } => {
                info!(context = %context, "Starting build");
            }
            ProgressEvent::Planned {
                builder_steps,
                runtime_steps,
            } => {
                debug!(builder_steps, runtime_steps, "Recipe validated");
            }
            ProgressEvent::Warning { message } => {
                warn!("{}", message);
            }
            ProgressEvent::StageStarted { stage } => {
                info!(stage = %stage, "Starting stage");
            }
            ProgressEvent::StepStarted {
                stage,
                index,
                total,
                label,
            } => {
                info!(
                    stage = %stage,
                    progress = format!("{}/{}", index, total),
                    "{}",
                    label
                );
            }
            ProgressEvent::Output { stage, line } => {
                debug!(stage = %stage, "{}", line);
            }
            ProgressEvent::StageCompleted {
                stage,
                artifact,
                duration,
            } => {
                info!(
                    stage = %stage,
                    artifact = %artifact,
                    duration_ms = duration.as_millis(),
                    "Stage complete"
                );
            }
            ProgressEvent::StageFailed { stage, step, error } => {
                error!(stage = %stage, step = %step, "Stage failed: {}", error);
            }
            ProgressEvent::Completed { image, total_time } => {
                info!(
                    image = %image,
                    total_time_ms = total_time.as_millis(),
                    "Build complete"
                );
            }
            ProgressEvent::Failed { error } => {
                warn!(error = %error, "Build failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::StageRole;
    use std::time::Duration;

    #[test]
    fn test_logging_handler_all_events() {
        let handler = LoggingHandler;
        let events = vec![
            ProgressEvent::Started {
                context: "/repo".to_string(),
            },
            ProgressEvent::Planned {
                builder_steps: 4,
                runtime_steps: 5,
            },
            ProgressEvent::Warning {
                message: "requests is not pinned".to_string(),
            },
            ProgressEvent::StageStarted {
                stage: StageRole::Builder,
            },
            ProgressEvent::StepStarted {
                stage: StageRole::Builder,
                index: 1,
                total: 5,
                label: "install package tool".to_string(),
            },
            ProgressEvent::Output {
                stage: StageRole::Builder,
                line: "Resolved 12 packages".to_string(),
            },
            ProgressEvent::StageCompleted {
                stage: StageRole::Builder,
                artifact: "sha256:abc".to_string(),
                duration: Duration::from_secs(3),
            },
            ProgressEvent::StageFailed {
                stage: StageRole::Runtime,
                step: "copy . -> .".to_string(),
                error: "no space left on device".to_string(),
            },
            ProgressEvent::Completed {
                image: "sha256:def".to_string(),
                total_time: Duration::from_secs(9),
            },
            ProgressEvent::Failed {
                error: "boom".to_string(),
            },
        ];

        for event in events {
            handler.on_progress(&event);
        }
    }
}
