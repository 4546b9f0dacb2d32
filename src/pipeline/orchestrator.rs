use super::executor::{StageExecutor, StageRequest};
use super::plan::Plan;
use super::report::{BuildFailure, BuildReport, StageReport};
use super::state::{PipelineState, StageStatus};
use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::recipe::StageRole;
use crate::validation::Validator;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

const STAGE_ORDER: [StageRole; 2] = [StageRole::Builder, StageRole::Runtime];

pub struct PipelineOrchestrator<E: StageExecutor> {
    executor: E,
    validator: Validator,
    progress_handler: Arc<dyn ProgressHandler>,
}

impl<E: StageExecutor> PipelineOrchestrator<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            validator: Validator::new(),
            progress_handler: Arc::new(NoOpHandler),
        }
    }

    pub fn with_progress(mut self, handler: Arc<dyn ProgressHandler>) -> Self {
        self.progress_handler = handler;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Resolves and validates inputs without executing anything
    pub fn plan(&self, config: &BuildConfig) -> Result<Plan, BuildError> {
        self.emit(ProgressEvent::Started {
            context: config.context.display().to_string(),
        });

        let plan = Plan::prepare(config, &self.validator)?;
        for warning in &plan.warnings {
            self.emit(ProgressEvent::Warning {
                message: warning.clone(),
            });
        }
        self.emit(ProgressEvent::Planned {
            builder_steps: plan.recipe.builder.steps.len(),
            runtime_steps: plan.recipe.runtime.steps.len(),
        });
        Ok(plan)
    }

    /// Plans and executes in one go
    pub async fn run(&self, config: &BuildConfig) -> Result<BuildReport, BuildFailure> {
        let started = Instant::now();
        match self.plan(config) {
            Ok(plan) => self.execute(&plan).await,
            Err(error) => {
                let mut report = self.empty_report(config.context.display().to_string());
                report.tag = config.tag.clone();
                Err(self.abort(report, started, error))
            }
        }
    }

    /// Runs the builder stage, then the runtime stage, stopping at the first failure
    pub async fn execute(&self, plan: &Plan) -> Result<BuildReport, BuildFailure> {
        let started = Instant::now();
        info!(
            "Executing recipe for {} with {} executor",
            plan.context.root.display(),
            self.executor.name()
        );

        let mut report = self.empty_report(plan.context.root.display().to_string());
        report.tag = plan.tag.clone();
        report.warnings = plan.warnings.clone();
        report.labels = plan.labels(report.started_at);

        let untagged = BTreeMap::new();
        let mut state = PipelineState::new();

        for role in STAGE_ORDER {
            if let Err(error) = state.start(role) {
                return Err(self.abort(report, started, error));
            }
            self.emit(ProgressEvent::StageStarted { stage: role });

            let is_final = role == StageRole::Runtime;
            let digest = match role {
                StageRole::Builder => &plan.stages.builder,
                StageRole::Runtime => &plan.stages.runtime,
            };
            let request = StageRequest {
                stage: role,
                recipe: &plan.recipe,
                dockerfile: &plan.dockerfile,
                context: &plan.context,
                digest,
                tag: if is_final { plan.tag.as_deref() } else { None },
                labels: if is_final { &report.labels } else { &untagged },
                no_cache: plan.no_cache,
                progress: self.progress_handler.as_ref(),
            };

            let stage_started = Instant::now();
            let result = self.executor.execute(&request).await;
            let duration = stage_started.elapsed();

            match result {
                Ok(output) => {
                    if let Err(error) = state.finish(role, true) {
                        return Err(self.abort(report, started, error));
                    }
                    debug!(stage = %role, artifact = %output.artifact, "Stage produced artifact");
                    self.emit(ProgressEvent::StageCompleted {
                        stage: role,
                        artifact: output.artifact.clone(),
                        duration,
                    });
                    report.stages.push(StageReport {
                        stage: role,
                        status: StageStatus::Succeeded,
                        digest: digest.to_string(),
                        artifact: Some(output.artifact.clone()),
                        duration_ms: duration.as_millis(),
                        failed_step: None,
                        error: None,
                    });
                    if is_final {
                        report.image_id = Some(output.artifact);
                    }
                }
                Err(error) => {
                    let _ = state.finish(role, false);
                    let step = match &error {
                        BuildError::StageFailed { step, .. } => step.clone(),
                        _ => "-".to_string(),
                    };
                    self.emit(ProgressEvent::StageFailed {
                        stage: role,
                        step: step.clone(),
                        error: error.to_string(),
                    });
                    report.stages.push(StageReport {
                        stage: role,
                        status: StageStatus::Failed,
                        digest: digest.to_string(),
                        artifact: None,
                        duration_ms: duration.as_millis(),
                        failed_step: Some(step),
                        error: Some(error.to_string()),
                    });
                    return Err(self.abort(report, started, error));
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis();
        let image = report.image_id.clone().unwrap_or_default();
        info!("Build complete: {}", image);
        self.emit(ProgressEvent::Completed {
            image,
            total_time: started.elapsed(),
        });
        Ok(report)
    }

    fn empty_report(&self, context: String) -> BuildReport {
        BuildReport {
            id: Uuid::new_v4().to_string(),
            context,
            executor: self.executor.name().to_string(),
            started_at: Utc::now(),
            duration_ms: 0,
            tag: None,
            image_id: None,
            stages: Vec::new(),
            labels: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    fn abort(&self, mut report: BuildReport, started: Instant, error: BuildError) -> BuildFailure {
        report.duration_ms = started.elapsed().as_millis();
        self.emit(ProgressEvent::Failed {
            error: error.to_string(),
        });
        BuildFailure {
            report: Box::new(report),
            error,
        }
    }

    fn emit(&self, event: ProgressEvent) {
        self.progress_handler.on_progress(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PlanningExecutor;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "requests==2.31.0\n").unwrap();
        fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_planning_run() {
        let dir = project();
        let mut config = BuildConfig::defaults(dir.path());
        config.tag = Some("bot:latest".to_string());

        let orchestrator = PipelineOrchestrator::new(PlanningExecutor);
        let report = orchestrator.run(&config).await.unwrap();

        assert!(report.succeeded());
        assert_eq!(report.executor, "plan");
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.stages[0].stage, StageRole::Builder);
        assert_eq!(report.tag.as_deref(), Some("bot:latest"));
        assert_eq!(
            report.image_id.as_deref(),
            Some(report.stages[1].digest.as_str())
        );
        assert!(report.labels.contains_key(crate::pipeline::LABEL_CREATED));
    }

    #[tokio::test]
    async fn test_plan_failure_yields_empty_report() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::defaults(dir.path());
        let failure = PipelineOrchestrator::new(PlanningExecutor)
            .run(&config)
            .await
            .unwrap_err();
        assert!(matches!(failure.error, BuildError::ManifestMissing { .. }));
        assert!(failure.report.stages.is_empty());
        assert_eq!(failure.exit_code(), 2);
    }
}
