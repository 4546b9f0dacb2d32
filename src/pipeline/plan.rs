use crate::config::BuildConfig;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::manifest::Manifest;
use crate::recipe::{InputDigests, Recipe, StageDigests};
use crate::render;
use crate::validation::Validator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

pub const LABEL_CREATED: &str = "org.opencontainers.image.created";
pub const LABEL_MANIFEST_DIGEST: &str = "io.stagebox.manifest-digest";
pub const LABEL_BUILDER_DIGEST: &str = "io.stagebox.builder-digest";
pub const LABEL_VERSION: &str = "io.stagebox.version";

/// A validated recipe together with its resolved inputs
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub recipe: Recipe,
    pub manifest: Manifest,
    #[serde(skip)]
    pub context: BuildContext,
    pub context_files: usize,
    /// Bytes of file content sent to the daemon, before compression
    pub context_size: u64,
    pub inputs: InputDigests,
    pub stages: StageDigests,
    #[serde(skip)]
    pub dockerfile: String,
    pub tag: Option<String>,
    #[serde(skip)]
    pub no_cache: bool,
    pub warnings: Vec<String>,
}

impl Plan {
    /// Resolves inputs and validates the recipe.
    ///
    /// The manifest is read first so a missing manifest fails before the
    /// context is walked or any executor is involved.
    pub fn prepare(config: &BuildConfig, validator: &Validator) -> Result<Self, BuildError> {
        let manifest = Manifest::load(&config.context, &config.manifest)?;
        let context = BuildContext::collect(&config.context, &config.env_dir, &config.exclude)?;

        let recipe = Recipe::two_stage(config);
        validator
            .validate(&recipe)
            .map_err(|e| BuildError::Validation(e.to_string()))?;

        let inputs = InputDigests {
            manifest: manifest.digest.clone(),
            context: context.digest.clone(),
        };
        let stages = recipe.stage_digests(&inputs);
        debug!(builder = %stages.builder, runtime = %stages.runtime, "Stage digests");

        let mut warnings = manifest.lint();
        if !config.entry.ends_with(".py") {
            debug!("Entry '{}' runs as a module", config.entry);
        } else if !context.has_file(&config.entry) {
            warnings.push(format!(
                "Entry file '{}' is not in the build context; the image will fail at startup",
                config.entry
            ));
        }

        Ok(Self {
            dockerfile: render::render(&recipe),
            context_files: context.files.len(),
            context_size: context.total_size(),
            recipe,
            manifest,
            context,
            inputs,
            stages,
            tag: config.tag.clone(),
            no_cache: config.no_cache,
            warnings,
        })
    }

    /// Labels stamped on the final image
    pub fn labels(&self, created: DateTime<Utc>) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_CREATED.to_string(), created.to_rfc3339());
        labels.insert(
            LABEL_MANIFEST_DIGEST.to_string(),
            self.inputs.manifest.to_string(),
        );
        labels.insert(
            LABEL_BUILDER_DIGEST.to_string(),
            self.stages.builder.to_string(),
        );
        labels.insert(LABEL_VERSION.to_string(), crate::VERSION.to_string());
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_missing_manifest() {
        let dir = project(&[("main.py", "print('hi')\n")]);
        let config = BuildConfig::defaults(dir.path());
        let err = Plan::prepare(&config, &Validator::new()).unwrap_err();
        assert!(matches!(err, BuildError::ManifestMissing { .. }));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_missing_entry_is_a_warning() {
        let dir = project(&[("requirements.txt", "requests==2.31.0\n")]);
        let config = BuildConfig::defaults(dir.path());
        let plan = Plan::prepare(&config, &Validator::new()).unwrap();
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("main.py"));
    }

    #[test]
    fn test_plan_is_idempotent() {
        let dir = project(&[
            ("requirements.txt", "requests==2.31.0\n"),
            ("main.py", "print('hi')\n"),
        ]);
        let config = BuildConfig::defaults(dir.path());
        let a = Plan::prepare(&config, &Validator::new()).unwrap();
        let b = Plan::prepare(&config, &Validator::new()).unwrap();
        assert_eq!(a.stages, b.stages);
        assert_eq!(a.dockerfile, b.dockerfile);
        assert!(a.warnings.is_empty());
        assert_eq!(a.context_size, 29);
    }

    #[test]
    fn test_labels() {
        let dir = project(&[
            ("requirements.txt", "requests==2.31.0\n"),
            ("main.py", "print('hi')\n"),
        ]);
        let plan = Plan::prepare(&BuildConfig::defaults(dir.path()), &Validator::new()).unwrap();
        let created = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let labels = plan.labels(created);

        assert_eq!(labels[LABEL_CREATED], "2024-05-01T12:00:00+00:00");
        assert_eq!(labels[LABEL_BUILDER_DIGEST], plan.stages.builder.to_string());
        assert!(labels[LABEL_MANIFEST_DIGEST].starts_with("sha256:"));
        assert_eq!(labels[LABEL_VERSION], crate::VERSION);
    }
}
