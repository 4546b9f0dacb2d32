use super::stage::StageRole;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a `Run` step exists; the validator keys its invariants off this
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Puts the package installation tool into the stage
    InstallTool,
    /// Creates the environment and installs the manifest into it
    InstallDependencies,
}

/// Where a `Copy` step reads from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "stage")]
pub enum CopySource {
    /// The host build context
    Context,
    /// The filesystem produced by an earlier stage
    Stage(StageRole),
}

/// A single variable binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvBinding {
    pub key: String,
    pub value: String,
}

impl EnvBinding {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One ordered instruction inside a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Step {
    Run { kind: RunKind, command: String },
    Workdir { path: String },
    Copy {
        source: CopySource,
        src: String,
        dest: String,
    },
    Env { bindings: Vec<EnvBinding> },
    Cmd { argv: Vec<String> },
}

impl Step {
    /// Short label used in progress output and error messages
    pub fn label(&self) -> String {
        match self {
            Step::Run { kind, .. } => match kind {
                RunKind::InstallTool => "install package tool".to_string(),
                RunKind::InstallDependencies => "install dependencies".to_string(),
            },
            Step::Workdir { path } => format!("workdir {}", path),
            Step::Copy { source, src, dest } => match source {
                CopySource::Context => format!("copy {} -> {}", src, dest),
                CopySource::Stage(stage) => format!("copy {}:{} -> {}", stage, src, dest),
            },
            Step::Env { bindings } => format!(
                "env {}",
                bindings
                    .iter()
                    .map(|b| b.key.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Step::Cmd { argv } => format!("cmd {}", argv.join(" ")),
        }
    }

    pub fn is_install(&self) -> bool {
        matches!(self, Step::Run { .. })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let copy = Step::Copy {
            source: CopySource::Stage(StageRole::Builder),
            src: "/app/.venv".to_string(),
            dest: "/app/.venv".to_string(),
        };
        assert_eq!(copy.label(), "copy builder:/app/.venv -> /app/.venv");

        let env = Step::Env {
            bindings: vec![
                EnvBinding::new("PATH", "/app/.venv/bin:$PATH"),
                EnvBinding::new("PYTHONUNBUFFERED", "1"),
            ],
        };
        assert_eq!(env.label(), "env PATH,PYTHONUNBUFFERED");
    }

    #[test]
    fn test_step_serializes_tagged() {
        let step = Step::Workdir {
            path: "/app".to_string(),
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["op"], "workdir");
        assert_eq!(json["path"], "/app");
    }
}
