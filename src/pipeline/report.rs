use super::state::StageStatus;
use crate::error::BuildError;
use crate::recipe::StageRole;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageRole,
    pub status: StageStatus,
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub id: String,
    pub context: String,
    pub executor: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    pub stages: Vec<StageReport>,
    pub labels: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

impl BuildReport {
    pub fn succeeded(&self) -> bool {
        self.image_id.is_some()
            && self
                .stages
                .iter()
                .all(|s| s.status == StageStatus::Succeeded)
    }

    pub fn stage(&self, role: StageRole) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == role)
    }
}

/// A run that stopped at a failed stage, with what was recorded up to that point
#[derive(Debug, Error)]
#[error("{error}")]
pub struct BuildFailure {
    pub report: Box<BuildReport>,
    #[source]
    pub error: BuildError,
}

impl BuildFailure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}
