//! Terminal spinner for interactive builds

use super::{ProgressEvent, ProgressHandler};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TICK: Duration = Duration::from_millis(120);

/// Draws one spinner line per stage on stderr
pub struct SpinnerHandler {
    bar: ProgressBar,
}

impl SpinnerHandler {
    pub fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let bar = ProgressBar::new_spinner();
        bar.set_style(style);
        Self { bar }
    }

    /// Whether stderr is a terminal the spinner can redraw
    pub fn is_supported() -> bool {
        atty::is(atty::Stream::Stderr)
    }
}

impl Default for SpinnerHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler for SpinnerHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Warning { message } => {
                self.bar.println(format!("warning: {}", message));
            }
            ProgressEvent::StageStarted { stage } => {
                self.bar.reset();
                self.bar.set_prefix(stage.to_string());
                self.bar.set_message("starting");
                self.bar.enable_steady_tick(TICK);
            }
            ProgressEvent::StepStarted {
                index,
                total,
                label,
                ..
            } => {
                self.bar.set_message(format!("[{}/{}] {}", index, total, label));
            }
            ProgressEvent::StageCompleted {
                stage, duration, ..
            } => {
                self.bar.println(format!(
                    "done {} stage in {:.1}s",
                    stage,
                    duration.as_secs_f64()
                ));
            }
            ProgressEvent::StageFailed { stage, step, .. } => {
                self.bar
                    .println(format!("failed {} stage at `{}`", stage, step));
                self.bar.finish_and_clear();
            }
            ProgressEvent::Completed { .. } | ProgressEvent::Failed { .. } => {
                self.bar.finish_and_clear();
            }
            ProgressEvent::Started { .. }
            | ProgressEvent::Planned { .. }
            | ProgressEvent::Output { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::StageRole;
    use indicatif::ProgressDrawTarget;

    #[test]
    fn test_spinner_handles_stage_lifecycle() {
        let handler = SpinnerHandler::new();
        handler.bar.set_draw_target(ProgressDrawTarget::hidden());

        handler.on_progress(&ProgressEvent::StageStarted {
            stage: StageRole::Builder,
        });
        handler.on_progress(&ProgressEvent::StepStarted {
            stage: StageRole::Builder,
            index: 2,
            total: 5,
            label: "workdir /app".to_string(),
        });
        assert_eq!(handler.bar.message(), "[2/5] workdir /app");
        assert_eq!(handler.bar.prefix(), "builder");

        handler.on_progress(&ProgressEvent::Completed {
            image: "sha256:abc".to_string(),
            total_time: Duration::from_secs(1),
        });
        assert!(handler.bar.is_finished());
    }
}
