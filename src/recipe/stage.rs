use super::step::Step;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a stage in the two-stage pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageRole {
    Builder,
    Runtime,
}

impl StageRole {
    /// Name used for the stage alias and build target
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Builder => "builder",
            StageRole::Runtime => "runtime",
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, versioned base image reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImage {
    pub name: String,
    pub tag: String,
}

impl BaseImage {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

impl fmt::Display for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// One stage: a base image plus ordered steps producing a filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub role: StageRole,
    pub base: BaseImage,
    pub steps: Vec<Step>,
}

impl Stage {
    pub fn new(role: StageRole, base: BaseImage) -> Self {
        Self {
            role,
            base,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn workdir(&self) -> Option<&str> {
        self.steps.iter().rev().find_map(|s| match s {
            Step::Workdir { path } => Some(path.as_str()),
            _ => None,
        })
    }

    pub fn command(&self) -> Option<&[String]> {
        self.steps.iter().rev().find_map(|s| match s {
            Step::Cmd { argv } => Some(argv.as_slice()),
            _ => None,
        })
    }
}
