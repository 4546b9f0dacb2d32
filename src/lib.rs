//! stagebox - two-stage container images for Python applications
//!
//! A build runs in two stages. The builder stage installs a package
//! installer, creates an isolated environment and installs the dependency
//! manifest into it. The runtime stage starts from a fresh base image, copies
//! only that environment and the application source, puts the environment's
//! `bin` directory first on `PATH` and starts the entry file.
//!
//! # Example Usage
//!
//! ```ignore
//! use stagebox::{BuildConfig, ConfigOverrides, PipelineOrchestrator};
//! use stagebox::docker::{connect, DockerExecutor};
//! use std::path::Path;
//!
//! async fn build(path: &Path) -> anyhow::Result<String> {
//!     let config = BuildConfig::load(path, &ConfigOverrides::default())?;
//!     let orchestrator = PipelineOrchestrator::new(DockerExecutor::new(connect()?));
//!     let report = orchestrator.run(&config).await?;
//!     Ok(report.image_id.unwrap_or_default())
//! }
//! ```
//!
//! # Project Structure
//!
//! - [`config`]: layered build configuration
//! - [`manifest`] and [`context`]: the inputs a build consumes
//! - [`recipe`], [`validation`] and [`render`]: the two-stage recipe, its
//!   invariants and its Dockerfile form
//! - [`pipeline`]: stage sequencing and reporting
//! - [`docker`]: the Docker Engine executor and image verification

pub mod cli;
pub mod config;
pub mod context;
pub mod digest;
pub mod docker;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod recipe;
pub mod render;
pub mod util;
pub mod validation;

pub use config::{BuildConfig, ConfigError, ConfigOverrides};
pub use error::BuildError;
pub use pipeline::{BuildFailure, BuildReport, PipelineOrchestrator, Plan};
pub use recipe::{Installer, Recipe, StageRole};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name_is_stagebox() {
        assert_eq!(NAME, "stagebox");
    }
}
