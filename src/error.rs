use crate::config::ConfigError;
use crate::context::ContextError;
use crate::manifest::ManifestError;
use crate::recipe::StageRole;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dependency manifest not found: {}", path.display())]
    ManifestMissing { path: PathBuf },

    #[error("Build context not found: {}", path.display())]
    ContextMissing { path: PathBuf },

    #[error("Failed to read build input {}: {source}", path.display())]
    UnreadableInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image not found: {image}")]
    ImageMissing { image: String },

    #[error("{stage} stage failed at `{step}`: {message}")]
    StageFailed {
        stage: StageRole,
        step: String,
        message: String,
    },

    #[error("{stage} stage cannot start: {reason}")]
    StageBlocked { stage: StageRole, reason: String },

    #[error("Recipe validation failed: {0}")]
    Validation(String),

    #[error("Image inspection failed: {0}")]
    Inspection(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    /// Process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        match self {
            BuildError::ManifestMissing { .. }
            | BuildError::ContextMissing { .. }
            | BuildError::UnreadableInput { .. }
            | BuildError::ImageMissing { .. }
            | BuildError::Validation(_)
            | BuildError::Config(_) => 2,
            BuildError::StageFailed { .. }
            | BuildError::StageBlocked { .. }
            | BuildError::Inspection(_)
            | BuildError::Docker(_) => 1,
        }
    }
}

impl From<ManifestError> for BuildError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::NotFound(path) => BuildError::ManifestMissing { path },
            ManifestError::Io { path, source } => BuildError::UnreadableInput { path, source },
        }
    }
}

impl From<ContextError> for BuildError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::NotFound(path) => BuildError::ContextMissing { path },
            ContextError::NotADirectory(path) => BuildError::ContextMissing { path },
            ContextError::Io { path, source } => BuildError::UnreadableInput { path, source },
            ContextError::Walk(err) => BuildError::UnreadableInput {
                path: PathBuf::from("."),
                source: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failed_names_stage_and_step() {
        let err = BuildError::StageFailed {
            stage: StageRole::Builder,
            step: "RUN uv pip install -r requirements.txt".to_string(),
            message: "No solution found".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("builder stage failed"));
        assert!(msg.contains("uv pip install"));
        assert!(msg.contains("No solution found"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_inspection_failure_is_a_run_failure() {
        let err = BuildError::Inspection("inventory script exited with Some(1)".to_string());
        assert!(err.to_string().starts_with("Image inspection failed"));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(BuildError::Validation("x".to_string()).exit_code(), 2);
    }

    #[test]
    fn test_manifest_error_conversion() {
        let err: BuildError = ManifestError::NotFound(PathBuf::from("/ctx/requirements.txt")).into();
        assert!(matches!(err, BuildError::ManifestMissing { .. }));
        assert_eq!(err.exit_code(), 2);
    }
}
