//! Dependency manifest handling
//!
//! The manifest stays opaque to the pipeline: only the installer decides
//! whether it is valid. This module reads it, digests it, and classifies lines
//! well enough to warn about requirements that weaken reproducibility and to
//! compare pins against an installed inventory.

use crate::digest::Digest;
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How tightly a requirement line constrains its package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Constraint {
    /// `name==1.0` (or `===`)
    Pinned(String),
    /// Any other specifier set, e.g. `>=1.0,<2`
    Range(String),
    /// Bare package name
    Unpinned,
    /// `name @ https://...` or a VCS/URL line
    Direct(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    /// Normalized project name (PEP 503: lowercase, runs of `-_.` become `-`)
    pub name: String,
    pub constraint: Constraint,
    pub line: usize,
}

impl Requirement {
    pub fn pinned_version(&self) -> Option<&str> {
        match &self.constraint {
            Constraint::Pinned(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    /// Path relative to the build context
    pub path: String,
    #[serde(skip)]
    pub content: String,
    pub digest: Digest,
    pub requirements: Vec<Requirement>,
    /// Option lines (`-r`, `--index-url`, ...) passed through untouched
    pub options: Vec<String>,
}

impl Manifest {
    /// Reads the manifest at `relative` inside `context`
    pub fn load(context: &Path, relative: &str) -> Result<Self, ManifestError> {
        let path = context.join(relative);
        if !path.is_file() {
            return Err(ManifestError::NotFound(path));
        }

        let content = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(Self::parse(relative, content))
    }

    pub fn parse(relative: &str, content: String) -> Self {
        let mut requirements = Vec::new();
        let mut options = Vec::new();

        for (idx, raw) in logical_lines(&content) {
            let line = strip_comment(&raw);
            if line.is_empty() {
                continue;
            }
            if line.starts_with('-') {
                options.push(line.to_string());
                continue;
            }
            if let Some(req) = parse_requirement(line, idx + 1) {
                requirements.push(req);
            }
        }

        Self {
            path: relative.to_string(),
            digest: Digest::of_bytes(content.as_bytes()),
            content,
            requirements,
            options,
        }
    }

    pub fn pinned(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements
            .iter()
            .filter(|r| r.pinned_version().is_some())
    }

    /// Human-readable warnings about reproducibility
    pub fn lint(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.requirements.is_empty() && self.options.is_empty() {
            warnings.push(format!(
                "{} lists no packages; the environment will be empty",
                self.path
            ));
        }

        for req in &self.requirements {
            match &req.constraint {
                Constraint::Unpinned => warnings.push(format!(
                    "{}:{}: '{}' is not pinned; rebuilds may install a different version",
                    self.path, req.line, req.name
                )),
                Constraint::Range(spec) => warnings.push(format!(
                    "{}:{}: '{}{}' allows a range of versions",
                    self.path, req.line, req.name, spec
                )),
                Constraint::Pinned(_) | Constraint::Direct(_) => {}
            }
        }

        warnings
    }
}

/// PEP 503 name normalization
pub fn normalize_name(name: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[-_.]+").expect("valid regex"));
    re.replace_all(name.trim(), "-").to_lowercase()
}

/// Joins backslash continuations, keeping the first physical line index
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (idx, line) in content.lines().enumerate() {
        let (start, mut buf) = current.take().unwrap_or((idx, String::new()));
        if let Some(stripped) = line.strip_suffix('\\') {
            buf.push_str(stripped);
            buf.push(' ');
            current = Some((start, buf));
        } else {
            buf.push_str(line);
            lines.push((start, buf));
        }
    }
    if let Some(pending) = current {
        lines.push(pending);
    }
    lines
}

fn strip_comment(line: &str) -> &str {
    let line = line.trim();
    if line.starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(pos) => line[..pos].trim(),
        None => line,
    }
}

fn parse_requirement(line: &str, line_no: usize) -> Option<Requirement> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(\[[^\]]*\])?\s*(.*)$").expect("valid regex")
    });

    if line.contains("://") && !line.contains('@') {
        return Some(Requirement {
            name: line.to_string(),
            constraint: Constraint::Direct(line.to_string()),
            line: line_no,
        });
    }

    let caps = re.captures(line)?;
    let name = normalize_name(&caps[1]);
    let rest = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    let spec = rest.split(';').next().unwrap_or("");
    let spec = spec.split(" --").next().unwrap_or("").trim();

    let constraint = if let Some(url) = spec.strip_prefix('@') {
        Constraint::Direct(url.trim().to_string())
    } else if spec.is_empty() {
        Constraint::Unpinned
    } else if let Some(version) = exact_pin(spec) {
        Constraint::Pinned(version)
    } else {
        Constraint::Range(spec.replace(' ', ""))
    };

    Some(Requirement {
        name,
        constraint,
        line: line_no,
    })
}

fn exact_pin(spec: &str) -> Option<String> {
    if spec.contains(',') {
        return None;
    }
    let version = spec
        .strip_prefix("===")
        .or_else(|| spec.strip_prefix("=="))?
        .trim();
    if version.is_empty() || version.contains('*') {
        None
    } else {
        Some(version.to_string())
    }
}
