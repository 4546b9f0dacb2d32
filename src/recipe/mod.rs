//! Two-stage build recipe
//!
//! The recipe is plain data: a builder stage that produces the dependency
//! environment and a runtime stage that receives it by stage reference. Both
//! the Dockerfile renderer and the Docker executor consume the same value, and
//! the validator checks it before anything runs.

mod installer;
mod stage;
mod step;

pub use installer::Installer;
pub use stage::{BaseImage, Stage, StageRole};
pub use step::{CopySource, EnvBinding, RunKind, Step};

use crate::config::BuildConfig;
use crate::digest::{Digest, DigestBuilder};
use serde::{Deserialize, Serialize};

/// Location of the dependency environment inside both stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub path: String,
}

impl EnvironmentSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn bin_dir(&self) -> String {
        format!("{}/bin", self.path)
    }

    pub fn python(&self) -> String {
        format!("{}/bin/python", self.path)
    }

    /// `PATH` value placing the environment ahead of the base image
    pub fn search_path(&self) -> String {
        format!("{}:$PATH", self.bin_dir())
    }
}

/// Digests of the inputs that feed the stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDigests {
    pub manifest: Digest,
    pub context: Digest,
}

/// Content-addressed identity of each stage's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDigests {
    pub builder: Digest,
    pub runtime: Digest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub builder: Stage,
    pub runtime: Stage,
    pub environment: EnvironmentSpec,
    pub installer: Installer,
    pub manifest: String,
    pub entry: String,
}

impl Recipe {
    /// Assembles the builder and runtime stages from a resolved configuration
    pub fn two_stage(config: &BuildConfig) -> Self {
        let base = BaseImage::new(&config.base_image, config.base_tag());
        let environment = EnvironmentSpec::new(config.env_path());
        let workdir = config.workdir.clone();
        let manifest_name = manifest_file_name(&config.manifest);

        let mut builder = Stage::new(StageRole::Builder, base.clone());
        if let Some(command) = config.installer.install_tool_command() {
            builder = builder.step(Step::Run {
                kind: RunKind::InstallTool,
                command,
            });
        }
        builder = builder
            .step(Step::Workdir {
                path: workdir.clone(),
            })
            .step(Step::Copy {
                source: CopySource::Context,
                src: config.manifest.clone(),
                dest: manifest_name.clone(),
            })
            .step(Step::Run {
                kind: RunKind::InstallDependencies,
                command: config
                    .installer
                    .install_command(&environment.path, &manifest_name),
            });

        let mut bindings = vec![EnvBinding::new("PATH", environment.search_path())];
        bindings.extend(
            config
                .runtime_env
                .iter()
                .map(|(k, v)| EnvBinding::new(k, v)),
        );

        let runtime = Stage::new(StageRole::Runtime, base)
            .step(Step::Workdir { path: workdir })
            .step(Step::Copy {
                source: CopySource::Stage(StageRole::Builder),
                src: environment.path.clone(),
                dest: environment.path.clone(),
            })
            .step(Step::Env { bindings })
            .step(Step::Copy {
                source: CopySource::Context,
                src: ".".to_string(),
                dest: ".".to_string(),
            })
            .step(Step::Cmd {
                argv: entry_command(&config.entry),
            });

        Self {
            builder,
            runtime,
            environment,
            installer: config.installer,
            manifest: config.manifest.clone(),
            entry: config.entry.clone(),
        }
    }

    pub fn stages(&self) -> [&Stage; 2] {
        [&self.builder, &self.runtime]
    }

    pub fn stage(&self, role: StageRole) -> &Stage {
        match role {
            StageRole::Builder => &self.builder,
            StageRole::Runtime => &self.runtime,
        }
    }

    /// Derives stage identities from their definitions and inputs.
    ///
    /// The builder digest depends only on its base, steps and the manifest, so
    /// source edits never invalidate the environment. The runtime digest chains
    /// the builder digest with the source tree.
    pub fn stage_digests(&self, inputs: &InputDigests) -> StageDigests {
        let builder = {
            let mut b = DigestBuilder::new("stagebox.stage.builder.v1");
            hash_stage(&mut b, &self.builder);
            b.digest(&inputs.manifest);
            b.finish()
        };

        let runtime = {
            let mut b = DigestBuilder::new("stagebox.stage.runtime.v1");
            hash_stage(&mut b, &self.runtime);
            b.digest(&builder).digest(&inputs.context);
            b.finish()
        };

        StageDigests { builder, runtime }
    }
}

fn hash_stage(builder: &mut DigestBuilder, stage: &Stage) {
    builder.str(&stage.base.reference());
    for step in &stage.steps {
        // Step is plain data; serialization is infallible
        let encoded = serde_json::to_string(step).unwrap_or_default();
        builder.str(&encoded);
    }
}

/// Startup argv for an entry file (`python main.py`) or dotted module
/// (`python -m bot.app`)
pub fn entry_command(entry: &str) -> Vec<String> {
    if entry.ends_with(".py") {
        vec!["python".to_string(), entry.to_string()]
    } else {
        vec!["python".to_string(), "-m".to_string(), entry.to_string()]
    }
}

fn manifest_file_name(manifest: &str) -> String {
    std::path::Path::new(manifest)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| manifest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> (BuildConfig, TempDir) {
        let dir = TempDir::new().unwrap();
        (BuildConfig::defaults(dir.path()), dir)
    }

    fn inputs(manifest: &[u8], context: &[u8]) -> InputDigests {
        InputDigests {
            manifest: Digest::of_bytes(manifest),
            context: Digest::of_bytes(context),
        }
    }

    #[test]
    fn test_builder_step_order() {
        let (config, _dir) = config();
        let recipe = Recipe::two_stage(&config);
        let steps = &recipe.builder.steps;

        assert_eq!(steps.len(), 4);
        assert!(matches!(
            steps[0],
            Step::Run {
                kind: RunKind::InstallTool,
                ..
            }
        ));
        assert_eq!(
            steps[1],
            Step::Workdir {
                path: "/app".to_string()
            }
        );
        assert!(matches!(
            &steps[2],
            Step::Copy { source: CopySource::Context, src, .. } if src == "requirements.txt"
        ));
        assert!(matches!(
            steps[3],
            Step::Run {
                kind: RunKind::InstallDependencies,
                ..
            }
        ));
    }

    #[test]
    fn test_pip_builder_has_no_tool_step() {
        let (mut config, _dir) = config();
        config.installer = Installer::Pip;
        let recipe = Recipe::two_stage(&config);
        assert_eq!(recipe.builder.steps.len(), 3);
        assert!(matches!(recipe.builder.steps[0], Step::Workdir { .. }));
    }

    #[test]
    fn test_runtime_stage_shape() {
        let (config, _dir) = config();
        let recipe = Recipe::two_stage(&config);
        let runtime = &recipe.runtime;

        assert_eq!(runtime.base, recipe.builder.base);
        assert_eq!(runtime.workdir(), recipe.builder.workdir());
        assert!(!runtime.steps.iter().any(Step::is_install));

        match &runtime.steps[2] {
            Step::Env { bindings } => {
                assert_eq!(bindings[0].key, "PATH");
                assert_eq!(bindings[0].value, "/app/.venv/bin:$PATH");
            }
            other => panic!("Expected env step, got {:?}", other),
        }
        assert_eq!(
            runtime.command(),
            Some(&["python".to_string(), "main.py".to_string()][..])
        );
    }

    #[test]
    fn test_nested_manifest_copied_by_file_name() {
        let (mut config, _dir) = config();
        config.manifest = "deploy/requirements.txt".to_string();
        let recipe = Recipe::two_stage(&config);
        assert!(matches!(
            &recipe.builder.steps[2],
            Step::Copy { src, dest, .. } if src == "deploy/requirements.txt" && dest == "requirements.txt"
        ));
    }

    #[test]
    fn test_entry_command() {
        assert_eq!(entry_command("main.py"), vec!["python", "main.py"]);
        assert_eq!(
            entry_command("event_server/main.py"),
            vec!["python", "event_server/main.py"]
        );
        assert_eq!(entry_command("bot.app"), vec!["python", "-m", "bot.app"]);
    }

    #[test]
    fn test_stage_digests_are_deterministic() {
        let (config, _dir) = config();
        let recipe = Recipe::two_stage(&config);
        let a = recipe.stage_digests(&inputs(b"requests==2.31.0\n", b"ctx"));
        let b = recipe.stage_digests(&inputs(b"requests==2.31.0\n", b"ctx"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_source_change_keeps_builder_digest() {
        let (config, _dir) = config();
        let recipe = Recipe::two_stage(&config);
        let a = recipe.stage_digests(&inputs(b"requests==2.31.0\n", b"ctx-1"));
        let b = recipe.stage_digests(&inputs(b"requests==2.31.0\n", b"ctx-2"));
        assert_eq!(a.builder, b.builder);
        assert_ne!(a.runtime, b.runtime);
    }

    #[test]
    fn test_manifest_change_invalidates_both() {
        let (config, _dir) = config();
        let recipe = Recipe::two_stage(&config);
        let a = recipe.stage_digests(&inputs(b"requests==2.31.0\n", b"ctx"));
        let b = recipe.stage_digests(&inputs(b"requests==2.32.0\n", b"ctx"));
        assert_ne!(a.builder, b.builder);
        assert_ne!(a.runtime, b.runtime);
    }
}
