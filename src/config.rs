//! Build configuration for stagebox
//!
//! Settings resolve in four layers, each overriding the previous one:
//!
//! 1. Built-in defaults (Python version taken from `.python-version` or
//!    `runtime.txt` in the context when present)
//! 2. `stagebox.toml` in the build context root
//! 3. `STAGEBOX_*` environment variables
//! 4. Command-line flags
//!
//! # Environment Variables
//!
//! - `STAGEBOX_PYTHON_VERSION`: interpreter version used for the base image tag - default: "3.12"
//! - `STAGEBOX_BASE_IMAGE`: base image repository - default: "python"
//! - `STAGEBOX_BASE_VARIANT`: base image tag suffix - default: "slim"
//! - `STAGEBOX_WORKDIR`: working directory shared by both stages - default: "/app"
//! - `STAGEBOX_MANIFEST`: dependency manifest, relative to the context - default: "requirements.txt"
//! - `STAGEBOX_ENV_DIR`: environment directory, relative to the workdir - default: ".venv"
//! - `STAGEBOX_INSTALLER`: package installation tool (uv|pip) - default: "uv"
//! - `STAGEBOX_ENTRY`: entry file (or module) started by the image - default: "main.py"
//! - `STAGEBOX_TAG`: tag applied to the final image
//! - `STAGEBOX_NO_CACHE`: disable the daemon's layer cache (true|false) - default: "false"
//!
//! # Example
//!
//! ```no_run
//! use stagebox::config::{BuildConfig, ConfigOverrides};
//! use std::path::Path;
//!
//! let config = BuildConfig::load(Path::new("."), &ConfigOverrides::default())
//!     .expect("Invalid configuration");
//! println!("{}", config);
//! ```

use crate::recipe::Installer;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

const DEFAULT_PYTHON_VERSION: &str = "3.12";
const DEFAULT_BASE_IMAGE: &str = "python";
const DEFAULT_BASE_VARIANT: &str = "slim";
const DEFAULT_WORKDIR: &str = "/app";
const DEFAULT_MANIFEST: &str = "requirements.txt";
const DEFAULT_ENV_DIR: &str = ".venv";
const DEFAULT_ENTRY: &str = "main.py";

/// Name of the optional configuration file in the context root
pub const CONFIG_FILE_NAME: &str = "stagebox.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    /// Invalid installer name
    #[error("Invalid installer: {0}. Valid options: uv, pip")]
    InvalidInstaller(String),

    /// Configuration file could not be read or parsed
    #[error("Failed to load {}: {error}", path.display())]
    FileError { path: PathBuf, error: String },
}

/// Contents of `stagebox.toml`; every key is optional
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub python_version: Option<String>,
    pub base_image: Option<String>,
    pub base_variant: Option<String>,
    pub workdir: Option<String>,
    pub manifest: Option<String>,
    pub env_dir: Option<String>,
    pub installer: Option<String>,
    pub entry: Option<String>,
    pub tag: Option<String>,
    pub no_cache: Option<bool>,
    #[serde(default)]
    pub runtime_env: BTreeMap<String, String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Values supplied on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub python_version: Option<String>,
    pub base_image: Option<String>,
    pub base_variant: Option<String>,
    pub workdir: Option<String>,
    pub manifest: Option<String>,
    pub env_dir: Option<String>,
    pub installer: Option<Installer>,
    pub entry: Option<String>,
    pub tag: Option<String>,
    pub no_cache: bool,
    pub runtime_env: Vec<(String, String)>,
    pub exclude: Vec<String>,
}

/// Fully resolved build configuration
#[derive(Debug, Clone, Serialize)]
pub struct BuildConfig {
    /// Build context root on the host
    pub context: PathBuf,

    /// Python version, used as the base image tag prefix
    pub python_version: String,

    /// Base image repository, shared by both stages
    pub base_image: String,

    /// Base image tag suffix (empty for the plain `<version>` tag)
    pub base_variant: String,

    /// Absolute working directory inside both stages
    pub workdir: String,

    /// Dependency manifest path relative to the context
    pub manifest: String,

    /// Environment directory relative to the working directory
    pub env_dir: String,

    /// Package installation tool used by the builder stage
    pub installer: Installer,

    /// Entry file (or dotted module) started by the final image
    pub entry: String,

    /// Extra variables bound in the final image
    pub runtime_env: BTreeMap<String, String>,

    /// Extra context exclusion patterns (gitignore syntax)
    pub exclude: Vec<String>,

    /// Tag applied to the final image
    pub tag: Option<String>,

    /// Disable the daemon's layer cache
    pub no_cache: bool,
}

impl BuildConfig {
    /// Built-in defaults for a context directory
    pub fn defaults(context: &Path) -> Self {
        let python_version =
            read_python_version(context).unwrap_or_else(|| DEFAULT_PYTHON_VERSION.to_string());

        let mut runtime_env = BTreeMap::new();
        runtime_env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        runtime_env.insert("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string());

        Self {
            context: context.to_path_buf(),
            python_version,
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            base_variant: DEFAULT_BASE_VARIANT.to_string(),
            workdir: DEFAULT_WORKDIR.to_string(),
            manifest: DEFAULT_MANIFEST.to_string(),
            env_dir: DEFAULT_ENV_DIR.to_string(),
            installer: Installer::default(),
            entry: DEFAULT_ENTRY.to_string(),
            runtime_env,
            exclude: Vec::new(),
            tag: None,
            no_cache: false,
        }
    }

    /// Resolves all configuration layers for `context` and validates the result
    pub fn load(context: &Path, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(context);

        if let Some(file) = FileConfig::load(context)? {
            config.apply_file(file)?;
        }
        config.apply_env(|key| env::var(key).ok())?;
        config.apply_overrides(overrides);

        config.validate()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: FileConfig) -> Result<(), ConfigError> {
        set_if_some(&mut self.python_version, file.python_version);
        set_if_some(&mut self.base_image, file.base_image);
        set_if_some(&mut self.base_variant, file.base_variant);
        set_if_some(&mut self.workdir, file.workdir);
        set_if_some(&mut self.manifest, file.manifest);
        set_if_some(&mut self.env_dir, file.env_dir);
        set_if_some(&mut self.entry, file.entry);

        if let Some(installer) = file.installer {
            self.installer = installer.parse()?;
        }
        if file.tag.is_some() {
            self.tag = file.tag;
        }
        if let Some(no_cache) = file.no_cache {
            self.no_cache = no_cache;
        }

        self.runtime_env.extend(file.runtime_env);
        self.exclude.extend(file.exclude);
        Ok(())
    }

    /// Applies `STAGEBOX_*` variables read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        set_if_some(&mut self.python_version, lookup("STAGEBOX_PYTHON_VERSION"));
        set_if_some(&mut self.base_image, lookup("STAGEBOX_BASE_IMAGE"));
        set_if_some(&mut self.base_variant, lookup("STAGEBOX_BASE_VARIANT"));
        set_if_some(&mut self.workdir, lookup("STAGEBOX_WORKDIR"));
        set_if_some(&mut self.manifest, lookup("STAGEBOX_MANIFEST"));
        set_if_some(&mut self.env_dir, lookup("STAGEBOX_ENV_DIR"));
        set_if_some(&mut self.entry, lookup("STAGEBOX_ENTRY"));

        if let Some(installer) = lookup("STAGEBOX_INSTALLER") {
            self.installer = installer.parse()?;
        }
        if let Some(tag) = lookup("STAGEBOX_TAG") {
            self.tag = Some(tag);
        }
        if let Some(value) = lookup("STAGEBOX_NO_CACHE") {
            self.no_cache = value
                .trim()
                .to_lowercase()
                .parse::<bool>()
                .map_err(|e| ConfigError::ParseError {
                    field: "STAGEBOX_NO_CACHE".to_string(),
                    error: e.to_string(),
                })?;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        set_if_some(&mut self.python_version, overrides.python_version.clone());
        set_if_some(&mut self.base_image, overrides.base_image.clone());
        set_if_some(&mut self.base_variant, overrides.base_variant.clone());
        set_if_some(&mut self.workdir, overrides.workdir.clone());
        set_if_some(&mut self.manifest, overrides.manifest.clone());
        set_if_some(&mut self.env_dir, overrides.env_dir.clone());
        set_if_some(&mut self.entry, overrides.entry.clone());

        if let Some(installer) = overrides.installer {
            self.installer = installer;
        }
        if overrides.tag.is_some() {
            self.tag = overrides.tag.clone();
        }
        if overrides.no_cache {
            self.no_cache = true;
        }
        for (key, value) in &overrides.runtime_env {
            self.runtime_env.insert(key.clone(), value.clone());
        }
        self.exclude.extend(overrides.exclude.iter().cloned());
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` naming the first offending key
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !version_regex().is_match(&self.python_version) {
            return Err(ConfigError::ValidationFailed(format!(
                "python_version must look like 3, 3.12 or 3.12.4, got '{}'",
                self.python_version
            )));
        }
        if self.base_image.trim().is_empty() || self.base_image.contains(char::is_whitespace) {
            return Err(ConfigError::ValidationFailed(format!(
                "base_image is not a valid image name: '{}'",
                self.base_image
            )));
        }
        if self.base_variant.contains(char::is_whitespace) || self.base_variant.contains(':') {
            return Err(ConfigError::ValidationFailed(format!(
                "base_variant is not a valid tag suffix: '{}'",
                self.base_variant
            )));
        }
        if !self.workdir.starts_with('/') {
            return Err(ConfigError::ValidationFailed(format!(
                "workdir must be an absolute path, got '{}'",
                self.workdir
            )));
        }
        check_path_chars("workdir", &self.workdir)?;
        check_relative("manifest", &self.manifest)?;
        check_relative("env_dir", &self.env_dir)?;
        check_relative("entry", &self.entry)?;

        for key in self.runtime_env.keys() {
            if !env_name_regex().is_match(key) {
                return Err(ConfigError::ValidationFailed(format!(
                    "runtime_env key '{}' is not a valid variable name",
                    key
                )));
            }
            if key == "PATH" {
                return Err(ConfigError::ValidationFailed(
                    "runtime_env cannot set PATH; it is derived from env_dir".to_string(),
                ));
            }
        }

        if let Some(tag) = &self.tag {
            if !tag_regex().is_match(tag) {
                return Err(ConfigError::ValidationFailed(format!(
                    "tag is not a valid image reference: '{}'",
                    tag
                )));
            }
        }

        Ok(())
    }

    /// Tag of the base image shared by both stages (e.g. "3.12-slim")
    pub fn base_tag(&self) -> String {
        if self.base_variant.is_empty() {
            self.python_version.clone()
        } else {
            format!("{}-{}", self.python_version, self.base_variant)
        }
    }

    /// Absolute path of the dependency environment inside the image
    pub fn env_path(&self) -> String {
        let env_dir: Vec<&str> = self
            .env_dir
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        format!("{}/{}", self.workdir.trim_end_matches('/'), env_dir.join("/"))
    }

    /// Host path of the dependency manifest
    pub fn manifest_path(&self) -> PathBuf {
        self.context.join(&self.manifest)
    }

    /// Converts configuration to a display map for output formatting
    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("context".to_string(), self.context.display().to_string());
        map.insert(
            "base_image".to_string(),
            format!("{}:{}", self.base_image, self.base_tag()),
        );
        map.insert("workdir".to_string(), self.workdir.clone());
        map.insert("manifest".to_string(), self.manifest.clone());
        map.insert("env_path".to_string(), self.env_path());
        map.insert("installer".to_string(), self.installer.to_string());
        map.insert("entry".to_string(), self.entry.clone());
        if let Some(tag) = &self.tag {
            map.insert("tag".to_string(), tag.clone());
        }
        map.insert("no_cache".to_string(), self.no_cache.to_string());
        map
    }
}

impl FileConfig {
    /// Reads `stagebox.toml` from the context root, if present
    pub fn load(context: &Path) -> Result<Option<Self>, ConfigError> {
        let path = context.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileError {
            path: path.clone(),
            error: e.to_string(),
        })?;
        let file = toml::from_str(&content).map_err(|e| ConfigError::FileError {
            path: path.clone(),
            error: e.to_string(),
        })?;

        debug!("Loaded configuration from {}", path.display());
        Ok(Some(file))
    }
}

impl fmt::Display for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stagebox Configuration:")?;
        writeln!(f, "  Context: {}", self.context.display())?;
        writeln!(f, "  Base Image: {}:{}", self.base_image, self.base_tag())?;
        writeln!(f, "  Workdir: {}", self.workdir)?;
        writeln!(f, "  Manifest: {}", self.manifest)?;
        writeln!(f, "  Environment: {}", self.env_path())?;
        writeln!(f, "  Installer: {}", self.installer)?;
        writeln!(f, "  Entry: {}", self.entry)?;
        if let Some(ref tag) = self.tag {
            writeln!(f, "  Tag: {}", tag)?;
        }
        Ok(())
    }
}

fn set_if_some(target: &mut String, value: Option<String>) {
    if let Some(value) = value {
        *target = value.trim().to_string();
    }
}

fn check_relative(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(format!(
            "{} cannot be empty",
            field
        )));
    }
    let path = Path::new(value);
    if path.is_absolute() {
        return Err(ConfigError::ValidationFailed(format!(
            "{} must be a relative path, got '{}'",
            field, value
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ConfigError::ValidationFailed(format!(
            "{} cannot leave its base directory: '{}'",
            field, value
        )));
    }
    if !path.components().any(|c| matches!(c, Component::Normal(_))) {
        return Err(ConfigError::ValidationFailed(format!(
            "{} must name a path below its base directory, got '{}'",
            field, value
        )));
    }
    check_path_chars(field, value)
}

/// Paths are spliced into `COPY` and `RUN` lines unquoted
fn check_path_chars(field: &str, value: &str) -> Result<(), ConfigError> {
    if !path_regex().is_match(value) {
        return Err(ConfigError::ValidationFailed(format!(
            "{} may only contain letters, digits and . _ - + @ /, got '{}'",
            field, value
        )));
    }
    Ok(())
}

fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._+@/-]+$").expect("valid regex"))
}

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+){0,2}$").expect("valid regex"))
}

fn env_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([A-Za-z0-9.-]+(:[0-9]+)?/)?[a-z0-9]+([._-][a-z0-9]+)*(/[a-z0-9]+([._-][a-z0-9]+)*)*(:[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?$",
        )
        .expect("valid regex")
    })
}

fn normalize_python_version(raw: &str) -> Option<String> {
    let version = raw
        .trim()
        .trim_start_matches("python-")
        .trim_start_matches("python")
        .trim()
        .split('.')
        .take(2)
        .collect::<Vec<_>>()
        .join(".");

    if version_regex().is_match(&version) {
        Some(version)
    } else {
        None
    }
}

/// Reads the interpreter version pinned by `.python-version` or `runtime.txt`
pub fn read_python_version(context: &Path) -> Option<String> {
    [".python-version", "runtime.txt"]
        .iter()
        .filter_map(|name| fs::read_to_string(context.join(name)).ok())
        .find_map(|content| {
            content
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty() && !l.starts_with('#'))
                .and_then(normalize_python_version)
        })
}
