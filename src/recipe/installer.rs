//! Package installation tools the builder stage can use

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tool that resolves the manifest and populates the environment.
///
/// Neither variant leaves the tool inside the environment: `uv` lives only in
/// the builder stage, and `pip` drives a `--without-pip` venv from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Installer {
    #[default]
    Uv,
    Pip,
}

impl Installer {
    pub fn name(&self) -> &'static str {
        match self {
            Installer::Uv => "uv",
            Installer::Pip => "pip",
        }
    }

    /// Executables this tool puts on disk; none may appear in the environment
    pub fn executables(&self) -> &'static [&'static str] {
        match self {
            Installer::Uv => &["uv", "uvx"],
            Installer::Pip => &["pip", "pip3"],
        }
    }

    /// Whether the tool is added by the builder stage rather than shipped
    /// with the base image. Added tools must be absent from the final image.
    pub fn is_added_by_builder(&self) -> bool {
        matches!(self, Installer::Uv)
    }

    /// Command installing the tool into the builder stage, if one is needed
    pub fn install_tool_command(&self) -> Option<String> {
        match self {
            Installer::Uv => Some("pip install --no-cache-dir uv".to_string()),
            Installer::Pip => None,
        }
    }

    /// Command creating the environment at `env_path` and installing every
    /// package listed in `manifest` into it
    pub fn install_command(&self, env_path: &str, manifest: &str) -> String {
        let python = format!("{}/bin/python", env_path);
        match self {
            Installer::Uv => format!(
                "uv venv {env} && uv pip install --no-cache --python {python} -r {manifest}",
                env = env_path,
                python = python,
                manifest = manifest
            ),
            Installer::Pip => format!(
                "python -m venv --without-pip {env} && pip --python {python} install --no-cache-dir -r {manifest}",
                env = env_path,
                python = python,
                manifest = manifest
            ),
        }
    }
}

impl fmt::Display for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Installer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "uv" => Ok(Installer::Uv),
            "pip" => Ok(Installer::Pip),
            other => Err(ConfigError::InvalidInstaller(other.to_string())),
        }
    }
}
