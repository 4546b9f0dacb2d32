use crate::error::BuildError;
use crate::recipe::StageRole;
use serde::Serialize;
use std::fmt;

/// Lifecycle of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageState {
    pub role: StageRole,
    pub status: StageStatus,
}

impl StageState {
    pub fn new(role: StageRole) -> Self {
        Self {
            role,
            status: StageStatus::Pending,
        }
    }

    /// Moves to `next`; only `Pending -> Running -> Succeeded|Failed` is allowed
    pub fn transition(&mut self, next: StageStatus) -> Result<(), BuildError> {
        let allowed = matches!(
            (self.status, next),
            (StageStatus::Pending, StageStatus::Running)
                | (StageStatus::Running, StageStatus::Succeeded)
                | (StageStatus::Running, StageStatus::Failed)
        );
        if !allowed {
            return Err(BuildError::StageBlocked {
                stage: self.role,
                reason: format!("cannot move from {} to {}", self.status, next),
            });
        }
        self.status = next;
        Ok(())
    }
}

/// State of both stages; enforces their ordering
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub builder: StageState,
    pub runtime: StageState,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            builder: StageState::new(StageRole::Builder),
            runtime: StageState::new(StageRole::Runtime),
        }
    }

    pub fn get(&self, role: StageRole) -> &StageState {
        match role {
            StageRole::Builder => &self.builder,
            StageRole::Runtime => &self.runtime,
        }
    }

    /// Marks `role` as running once its upstream stage has succeeded
    pub fn start(&mut self, role: StageRole) -> Result<(), BuildError> {
        if role == StageRole::Runtime && self.builder.status != StageStatus::Succeeded {
            return Err(BuildError::StageBlocked {
                stage: role,
                reason: format!("builder stage is {}", self.builder.status),
            });
        }
        self.get_mut(role).transition(StageStatus::Running)
    }

    pub fn finish(&mut self, role: StageRole, success: bool) -> Result<(), BuildError> {
        let next = if success {
            StageStatus::Succeeded
        } else {
            StageStatus::Failed
        };
        self.get_mut(role).transition(next)
    }

    fn get_mut(&mut self, role: StageRole) -> &mut StageState {
        match role {
            StageRole::Builder => &mut self.builder,
            StageRole::Runtime => &mut self.runtime,
        }
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
