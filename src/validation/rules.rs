use crate::recipe::{CopySource, Recipe, RunKind, Stage, Step};
use anyhow::Result;

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, recipe: &Recipe) -> Result<()>;
}

pub struct RequiredFieldsRule;

impl ValidationRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "RequiredFields"
    }

    fn validate(&self, recipe: &Recipe) -> Result<()> {
        for stage in recipe.stages() {
            if stage.base.name.is_empty() || stage.base.tag.is_empty() {
                anyhow::bail!("{} stage base image must have a name and a tag", stage.role);
            }
            if stage.steps.is_empty() {
                anyhow::bail!("{} stage has no steps", stage.role);
            }
        }
        if recipe.environment.path.is_empty() {
            anyhow::bail!("Environment path cannot be empty");
        }
        if recipe.manifest.is_empty() {
            anyhow::bail!("Manifest path cannot be empty");
        }
        Ok(())
    }
}

pub struct WorkdirParityRule;

impl ValidationRule for WorkdirParityRule {
    fn name(&self) -> &'static str {
        "WorkdirParity"
    }

    fn validate(&self, recipe: &Recipe) -> Result<()> {
        let builder = recipe.builder.workdir();
        let runtime = recipe.runtime.workdir();
        match (builder, runtime) {
            (Some(b), Some(r)) if b == r => {
                if !b.starts_with('/') {
                    anyhow::bail!("Working directory '{}' must be absolute", b);
                }
                Ok(())
            }
            (Some(b), Some(r)) => {
                anyhow::bail!("Builder workdir '{}' differs from runtime workdir '{}'", b, r)
            }
            _ => anyhow::bail!("Both stages must set a working directory"),
        }
    }
}

pub struct BuilderInstallsDependenciesRule;

impl ValidationRule for BuilderInstallsDependenciesRule {
    fn name(&self) -> &'static str {
        "BuilderInstallsDependencies"
    }

    fn validate(&self, recipe: &Recipe) -> Result<()> {
        let steps = &recipe.builder.steps;
        let manifest_copy = steps.iter().position(|s| {
            matches!(s, Step::Copy { source: CopySource::Context, src, .. } if *src == recipe.manifest)
        });
        let install = steps.iter().position(|s| {
            matches!(
                s,
                Step::Run {
                    kind: RunKind::InstallDependencies,
                    ..
                }
            )
        });

        match (manifest_copy, install) {
            (Some(copy), Some(install)) if copy < install => Ok(()),
            (Some(_), Some(_)) => {
                anyhow::bail!("Manifest must be copied before dependencies are installed")
            }
            (None, _) => anyhow::bail!("Builder never copies the manifest '{}'", recipe.manifest),
            (_, None) => anyhow::bail!("Builder never installs dependencies"),
        }
    }
}

pub struct NoInstallerInRuntimeRule;

impl ValidationRule for NoInstallerInRuntimeRule {
    fn name(&self) -> &'static str {
        "NoInstallerInRuntime"
    }

    fn validate(&self, recipe: &Recipe) -> Result<()> {
        if let Some(step) = recipe.runtime.steps.iter().find(|s| s.is_install()) {
            anyhow::bail!("Runtime stage must not run install steps (found '{}')", step);
        }

        let executables = recipe.installer.executables();
        if let Some(argv) = recipe.runtime.command() {
            if let Some(first) = argv.first() {
                let program = first.rsplit('/').next().unwrap_or(first);
                if executables.contains(&program) {
                    anyhow::bail!("Runtime command must not invoke the installer '{}'", program);
                }
            }
        }
        Ok(())
    }
}

pub struct SingleInstallChannelRule;

impl ValidationRule for SingleInstallChannelRule {
    fn name(&self) -> &'static str {
        "SingleInstallChannel"
    }

    fn validate(&self, recipe: &Recipe) -> Result<()> {
        let workdir = recipe.runtime.workdir().unwrap_or("/");
        let env_path = normalize_path(workdir, &recipe.environment.path);
        let from_builder: Vec<&Step> = copies(&recipe.runtime)
            .filter(|s| matches!(s, Step::Copy { source: CopySource::Stage(_), .. }))
            .collect();

        match from_builder.as_slice() {
            [Step::Copy { src, dest, .. }]
                if normalize_path(workdir, src) == env_path
                    && normalize_path(workdir, dest) == env_path => {}
            [] => anyhow::bail!("Runtime stage never receives the environment from the builder"),
            _ => anyhow::bail!(
                "Runtime stage must copy exactly '{}' from the builder, unchanged",
                env_path
            ),
        }

        for step in copies(&recipe.runtime) {
            if let Step::Copy {
                source: CopySource::Context,
                dest,
                ..
            } = step
            {
                if normalize_path(workdir, dest) == env_path {
                    anyhow::bail!("Environment at '{}' must not come from the build context", env_path);
                }
            }
        }
        Ok(())
    }
}

pub struct PathPrecedenceRule;

impl ValidationRule for PathPrecedenceRule {
    fn name(&self) -> &'static str {
        "PathPrecedence"
    }

    fn validate(&self, recipe: &Recipe) -> Result<()> {
        let expected = recipe.environment.search_path();
        let path_binding = recipe.runtime.steps.iter().find_map(|s| match s {
            Step::Env { bindings } => bindings.iter().find(|b| b.key == "PATH"),
            _ => None,
        });

        match path_binding {
            Some(binding) if binding.value == expected => Ok(()),
            Some(binding) => anyhow::bail!(
                "PATH must start with {}, got '{}'",
                recipe.environment.bin_dir(),
                binding.value
            ),
            None => anyhow::bail!("Runtime stage never sets PATH"),
        }
    }
}

pub struct EntrypointDeclaredRule;

impl ValidationRule for EntrypointDeclaredRule {
    fn name(&self) -> &'static str {
        "EntrypointDeclared"
    }

    fn validate(&self, recipe: &Recipe) -> Result<()> {
        match recipe.runtime.steps.last() {
            Some(Step::Cmd { argv }) if !argv.is_empty() && argv.iter().all(|a| !a.is_empty()) => {
                Ok(())
            }
            Some(Step::Cmd { .. }) => anyhow::bail!("Runtime command cannot be empty"),
            _ => anyhow::bail!("Runtime stage must end with its startup command"),
        }
    }
}

/// Resolves `path` against `workdir`, dropping `.` segments and empty components
fn normalize_path(workdir: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workdir, path)
    };
    let segments: Vec<&str> = joined
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

fn copies(stage: &Stage) -> impl Iterator<Item = &Step> {
    stage
        .steps
        .iter()
        .filter(|s| matches!(s, Step::Copy { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildConfig;
    use crate::recipe::{EnvBinding, StageRole};
    use tempfile::TempDir;

    fn recipe() -> Recipe {
        let dir = TempDir::new().unwrap();
        Recipe::two_stage(&BuildConfig::defaults(dir.path()))
    }

    #[test]
    fn test_default_recipe_passes_every_rule() {
        let recipe = recipe();
        let rules: Vec<Box<dyn ValidationRule>> = vec![
            Box::new(RequiredFieldsRule),
            Box::new(WorkdirParityRule),
            Box::new(BuilderInstallsDependenciesRule),
            Box::new(NoInstallerInRuntimeRule),
            Box::new(SingleInstallChannelRule),
            Box::new(PathPrecedenceRule),
            Box::new(EntrypointDeclaredRule),
        ];
        for rule in rules {
            assert!(rule.validate(&recipe).is_ok(), "{} failed", rule.name());
        }
    }

    #[test]
    fn test_empty_base_tag() {
        let mut recipe = recipe();
        recipe.runtime.base.tag.clear();
        assert!(RequiredFieldsRule.validate(&recipe).is_err());
    }

    #[test]
    fn test_workdir_mismatch() {
        let mut recipe = recipe();
        recipe.runtime.steps[0] = Step::Workdir {
            path: "/srv".to_string(),
        };
        let err = WorkdirParityRule.validate(&recipe).unwrap_err();
        assert!(err.to_string().contains("/srv"));
    }

    #[test]
    fn test_relative_workdir() {
        let mut recipe = recipe();
        for stage in [&mut recipe.builder, &mut recipe.runtime] {
            for step in stage.steps.iter_mut() {
                if let Step::Workdir { path } = step {
                    *path = "app".to_string();
                }
            }
        }
        assert!(WorkdirParityRule.validate(&recipe).is_err());
    }

    #[test]
    fn test_install_before_manifest_copy() {
        let mut recipe = recipe();
        let len = recipe.builder.steps.len();
        recipe.builder.steps.swap(len - 2, len - 1);
        assert!(BuilderInstallsDependenciesRule.validate(&recipe).is_err());
    }

    #[test]
    fn test_runtime_install_rejected() {
        let mut recipe = recipe();
        recipe.runtime.steps.insert(
            1,
            Step::Run {
                kind: RunKind::InstallDependencies,
                command: "pip install -r requirements.txt".to_string(),
            },
        );
        assert!(NoInstallerInRuntimeRule.validate(&recipe).is_err());
    }

    #[test]
    fn test_runtime_command_invoking_installer() {
        let mut recipe = recipe();
        let last = recipe.runtime.steps.len() - 1;
        recipe.runtime.steps[last] = Step::Cmd {
            argv: vec!["/usr/local/bin/uv".to_string(), "run".to_string()],
        };
        assert!(NoInstallerInRuntimeRule.validate(&recipe).is_err());
    }

    #[test]
    fn test_environment_copied_to_other_path() {
        let mut recipe = recipe();
        recipe.runtime.steps[1] = Step::Copy {
            source: CopySource::Stage(StageRole::Builder),
            src: "/app/.venv".to_string(),
            dest: "/opt/venv".to_string(),
        };
        assert!(SingleInstallChannelRule.validate(&recipe).is_err());
    }

    #[test]
    fn test_environment_from_context_rejected() {
        let mut recipe = recipe();
        recipe.runtime.steps.insert(
            3,
            Step::Copy {
                source: CopySource::Context,
                src: ".venv".to_string(),
                dest: "/app/.venv/".to_string(),
            },
        );
        assert!(SingleInstallChannelRule.validate(&recipe).is_err());
    }

    #[test]
    fn test_environment_paths_compare_normalized() {
        let mut recipe = recipe();
        recipe.runtime.steps[1] = Step::Copy {
            source: CopySource::Stage(StageRole::Builder),
            src: "/app/./.venv/".to_string(),
            dest: "/app//.venv".to_string(),
        };
        assert!(SingleInstallChannelRule.validate(&recipe).is_ok());

        recipe.runtime.steps.insert(
            3,
            Step::Copy {
                source: CopySource::Context,
                src: ".venv".to_string(),
                dest: "./.venv".to_string(),
            },
        );
        assert!(SingleInstallChannelRule.validate(&recipe).is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/app", "/app/./.venv/"), "/app/.venv");
        assert_eq!(normalize_path("/app", ".venv"), "/app/.venv");
        assert_eq!(normalize_path("/app/", "./"), "/app");
        assert_eq!(normalize_path("/", "."), "/");
    }

    #[test]
    fn test_path_appended_instead_of_prepended() {
        let mut recipe = recipe();
        recipe.runtime.steps[2] = Step::Env {
            bindings: vec![EnvBinding::new("PATH", "$PATH:/app/.venv/bin")],
        };
        assert!(PathPrecedenceRule.validate(&recipe).is_err());
    }

    #[test]
    fn test_missing_command() {
        let mut recipe = recipe();
        recipe.runtime.steps.pop();
        assert!(EntrypointDeclaredRule.validate(&recipe).is_err());
    }
}
