//! Docker daemon backend

mod build;
mod client;
mod verify;

pub use build::{parse_step_line, BuildLog, DockerExecutor, StepMarker};
pub use client::{connect, daemon_info, is_available, DaemonInfo};
pub use verify::{
    evaluate, Check, Expectations, ImageFacts, ImageVerifier, Inventory, ToolPresence,
    VerifyReport,
};
