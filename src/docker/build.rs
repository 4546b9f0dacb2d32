use crate::context::DOCKERFILE_PATH;
use crate::error::BuildError;
use crate::pipeline::{StageExecutor, StageOutput, StageRequest};
use crate::progress::ProgressEvent;
use crate::render;
use async_trait::async_trait;
use bollard::models::BuildInfo;
use bollard::query_parameters::BuildImageOptionsBuilder;
use bollard::Docker;
use futures_util::{Stream, StreamExt};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::OnceLock;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Output lines kept for the failure message
const TAIL_LINES: usize = 12;

/// Runs each stage as a `docker build --target <stage>` over the same context.
///
/// The builder build goes first and is never tagged. The runtime build then
/// reuses the builder's cached layers, so dependencies are installed once.
pub struct DockerExecutor {
    client: Docker,
}

impl DockerExecutor {
    pub fn new(client: Docker) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Docker {
        &self.client
    }
}

#[async_trait]
impl StageExecutor for DockerExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn execute(&self, request: &StageRequest<'_>) -> Result<StageOutput, BuildError> {
        let tarball = request.context.to_tar_gz(request.dockerfile)?;
        debug!(
            stage = %request.stage,
            bytes = tarball.len(),
            "Uploading build context"
        );

        let labels: HashMap<String, String> = request
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        // The runtime build must hit the layers the builder build just produced
        let no_cache = request.no_cache && request.stage == crate::recipe::StageRole::Builder;

        let mut options = BuildImageOptionsBuilder::new()
            .dockerfile(DOCKERFILE_PATH)
            .target(request.stage.as_str())
            .rm(true)
            .forcerm(true)
            .nocache(no_cache)
            .labels(&labels);
        if let Some(tag) = request.tag {
            options = options.t(tag);
        }

        let body = ReaderStream::new(Cursor::new(tarball));
        let stream = self
            .client
            .build_image(options.build(), None, Some(bollard::body_try_stream(body)));

        let log = process_build_stream(stream, request).await;
        match (log.image_id, log.error) {
            (Some(image_id), None) => {
                info!(stage = %request.stage, "Built {}", image_id);
                Ok(StageOutput { artifact: image_id })
            }
            (_, error) => Err(BuildError::StageFailed {
                stage: request.stage,
                step: log
                    .current_instruction
                    .unwrap_or_else(|| "build".to_string()),
                message: error.unwrap_or_else(|| {
                    let tail: Vec<&str> = log.tail.iter().map(String::as_str).collect();
                    format!("daemon returned no image id; last output:\n{}", tail.join("\n"))
                }),
            }),
        }
    }
}

/// What the build stream told us
#[derive(Debug, Default)]
pub struct BuildLog {
    pub image_id: Option<String>,
    pub error: Option<String>,
    /// Last instruction the daemon announced, as echoed (`RUN ...`)
    pub current_instruction: Option<String>,
    pub tail: VecDeque<String>,
}

impl BuildLog {
    /// Records a `stream` chunk, returning any step markers it contained
    pub fn record_output(&mut self, chunk: &str) -> Vec<StepMarker> {
        let mut markers = Vec::new();
        for line in chunk.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            if let Some(marker) = parse_step_line(line) {
                self.current_instruction = Some(marker.instruction.clone());
                markers.push(marker);
            }
            if self.tail.len() == TAIL_LINES {
                self.tail.pop_front();
            }
            self.tail.push_back(line.to_string());
        }
        markers
    }

    pub fn record_error(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }
}

/// `Step N/M : INSTRUCTION` as printed by the classic builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepMarker {
    pub index: usize,
    pub total: usize,
    pub instruction: String,
}

pub fn parse_step_line(line: &str) -> Option<StepMarker> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^Step (\d+)/(\d+) : (.+)$").expect("valid regex"));
    let caps = re.captures(line.trim())?;
    Some(StepMarker {
        index: caps[1].parse().ok()?,
        total: caps[2].parse().ok()?,
        instruction: caps[3].trim().to_string(),
    })
}

async fn process_build_stream(
    mut stream: impl Stream<Item = Result<BuildInfo, bollard::errors::Error>> + Unpin,
    request: &StageRequest<'_>,
) -> BuildLog {
    let mut log = BuildLog::default();

    while let Some(item) = stream.next().await {
        match item {
            Ok(info) => {
                if let Some(id) = info.aux.and_then(|aux| aux.id) {
                    log.image_id = Some(id);
                }
                if let Some(chunk) = info.stream {
                    for marker in log.record_output(&chunk) {
                        let label = render::step_for_instruction(request.recipe, &marker.instruction)
                            .map(|step| step.label())
                            .unwrap_or_else(|| marker.instruction.to_lowercase());
                        request.progress.on_progress(&ProgressEvent::StepStarted {
                            stage: request.stage,
                            index: marker.index,
                            total: marker.total,
                            label,
                        });
                    }
                    for line in chunk.lines().filter(|l| !l.trim().is_empty()) {
                        request.progress.on_progress(&ProgressEvent::Output {
                            stage: request.stage,
                            line: line.to_string(),
                        });
                    }
                }
                if let Some(message) = info.error_detail.and_then(|e| e.message) {
                    log.record_error(message);
                }
            }
            Err(err) => log.record_error(err.to_string()),
        }
    }

    log
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step_line() {
        let marker = parse_step_line("Step 4/12 : RUN uv venv /app/.venv").unwrap();
        assert_eq!(marker.index, 4);
        assert_eq!(marker.total, 12);
        assert_eq!(marker.instruction, "RUN uv venv /app/.venv");

        assert!(parse_step_line(" ---> Running in 4f2a").is_none());
        assert!(parse_step_line("Successfully built 4f2a").is_none());
    }

    #[test]
    fn test_build_log_tracks_failing_instruction() {
        let mut log = BuildLog::default();
        let markers = log.record_output(
            "Step 1/5 : FROM python:3.12-slim AS builder\n ---> 1a2b\nStep 2/5 : RUN pip install --no-cache-dir uv\n",
        );
        assert_eq!(markers.len(), 2);
        log.record_output("Step 5/5 : RUN uv venv /app/.venv && uv pip install -r requirements.txt\n");
        log.record_output("  x No solution found when resolving dependencies\n");
        log.record_error("The command '/bin/sh -c uv venv' returned a non-zero code: 1".to_string());
        log.record_error("second error is ignored".to_string());

        assert_eq!(
            log.current_instruction.as_deref(),
            Some("RUN uv venv /app/.venv && uv pip install -r requirements.txt")
        );
        assert!(log.error.unwrap().contains("non-zero code"));
        assert!(log.image_id.is_none());
    }

    #[test]
    fn test_build_log_tail_is_bounded() {
        let mut log = BuildLog::default();
        for i in 0..40 {
            log.record_output(&format!("line {}\n", i));
        }
        assert_eq!(log.tail.len(), TAIL_LINES);
        assert_eq!(log.tail.back().map(String::as_str), Some("line 39"));
    }
}
