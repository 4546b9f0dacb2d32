//! Build context assembly
//!
//! Walks the application source tree, applies ignore rules, digests the
//! result and packs it (together with the rendered Dockerfile) into the
//! gzip tarball the Docker daemon expects as a build context.

use crate::digest::{Digest, DigestBuilder};
use flate2::write::GzEncoder;
use flate2::Compression;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::overrides::OverrideBuilder;
use ignore::{Match, WalkBuilder};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Path of the generated Dockerfile inside the uploaded context
pub const DOCKERFILE_PATH: &str = ".stagebox/Dockerfile";

/// Patterns never sent to the daemon at any depth, on top of `.dockerignore`
const DEFAULT_EXCLUDES: &[&str] = &[
    ".git/",
    ".dockerignore",
    "__pycache__/",
    "*.pyc",
    ".env",
    "*.log",
    ".stagebox/",
];

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Build context not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Build context is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk build context: {0}")]
    Walk(#[from] ignore::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextFile {
    /// Slash-separated path relative to the context root
    pub path: String,
    pub mode: u32,
    pub size: u64,
    pub digest: Digest,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildContext {
    pub root: PathBuf,
    pub files: Vec<ContextFile>,
    pub digest: Digest,
}

impl BuildContext {
    /// Collects the files under `root`, skipping ignored paths.
    ///
    /// `env_dir` is the local environment directory name (e.g. `.venv`); a
    /// developer's own virtualenv must never shadow the one the builder makes.
    pub fn collect(root: &Path, env_dir: &str, extra_excludes: &[String]) -> Result<Self, ContextError> {
        if !root.exists() {
            return Err(ContextError::NotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ContextError::NotADirectory(root.to_path_buf()));
        }

        let mut overrides = OverrideBuilder::new(root);
        let env_dir: Vec<&str> = env_dir
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();
        let env_pattern = format!("/{}/", env_dir.join("/"));
        for pattern in DEFAULT_EXCLUDES
            .iter()
            .map(|p| p.to_string())
            .chain(std::iter::once(env_pattern))
        {
            overrides.add(&format!("!{}", pattern))?;
        }
        let overrides = overrides.build()?;

        let dockerignore = Arc::new(DockerIgnore::load(root, extra_excludes)?);
        let prune = Arc::clone(&dockerignore);
        let prune_root = root.to_path_buf();

        // Docker reads neither .gitignore nor parent ignore files
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .ignore(false)
            .git_ignore(false)
            .git_exclude(false)
            .git_global(false)
            .parents(false)
            .require_git(false)
            .follow_links(false)
            .overrides(overrides)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if entry.depth() == 0 || !is_dir || !prune.can_prune() {
                    return true;
                }
                !prune.is_excluded(&relative_path(&prune_root, entry.path()), true)
            })
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                if entry.path_is_symlink() {
                    debug!("Skipping symlink {}", entry.path().display());
                }
                continue;
            }

            let path = entry.path();
            let relative = relative_path(root, path);
            if dockerignore.is_excluded(&relative, false) {
                continue;
            }
            let content = fs::read(path).map_err(|source| ContextError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let metadata = entry.metadata()?;

            files.push(ContextFile {
                path: relative,
                mode: file_mode(&metadata),
                size: content.len() as u64,
                digest: Digest::of_bytes(&content),
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        let digest = context_digest(&files);
        debug!(
            files = files.len(),
            digest = %digest,
            "Collected build context from {}",
            root.display()
        );

        Ok(Self {
            root: root.to_path_buf(),
            files,
            digest,
        })
    }

    pub fn has_file(&self, relative: &str) -> bool {
        let wanted = relative.trim_start_matches("./");
        self.files.iter().any(|f| f.path == wanted)
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Packs the context and `dockerfile` into a gzip tarball.
    ///
    /// Entries carry zero mtimes and no ownership so identical trees produce
    /// identical archives.
    pub fn to_tar_gz(&self, dockerfile: &str) -> Result<Vec<u8>, ContextError> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut archive = tar::Builder::new(encoder);
        let io_err = |source: std::io::Error| ContextError::Io {
            path: self.root.clone(),
            source,
        };

        append_bytes(&mut archive, DOCKERFILE_PATH, 0o644, dockerfile.as_bytes()).map_err(io_err)?;
        append_bytes(&mut archive, ".dockerignore", 0o644, b".stagebox\n.dockerignore\n")
            .map_err(io_err)?;

        for file in &self.files {
            let path = self.root.join(&file.path);
            let content = fs::read(&path).map_err(|source| ContextError::Io {
                path: path.clone(),
                source,
            })?;
            append_bytes(&mut archive, &file.path, file.mode, &content).map_err(io_err)?;
        }

        let encoder = archive.into_inner().map_err(io_err)?;
        encoder.finish().map_err(io_err)
    }
}

/// `.dockerignore` rules plus `--exclude` patterns, matched the way the
/// Docker CLI matches them: relative to the context root, never at depth.
struct DockerIgnore {
    matcher: Gitignore,
}

impl DockerIgnore {
    fn load(root: &Path, extra_excludes: &[String]) -> Result<Self, ContextError> {
        let path = root.join(".dockerignore");
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(ContextError::Io { path, source }),
        };

        let mut builder = GitignoreBuilder::new(root);
        for line in content.lines().chain(extra_excludes.iter().map(String::as_str)) {
            if let Some(pattern) = anchor_pattern(line) {
                builder.add_line(None, &pattern)?;
            }
        }
        Ok(Self {
            matcher: builder.build()?,
        })
    }

    /// Excluded directories can be skipped whole only when no `!` exception
    /// could re-include something beneath them
    fn can_prune(&self) -> bool {
        self.matcher.num_whitelists() == 0
    }

    fn is_excluded(&self, relative: &str, is_dir: bool) -> bool {
        if relative.is_empty() {
            return false;
        }
        matches!(
            self.matcher
                .matched_path_or_any_parents(Path::new(relative), is_dir),
            Match::Ignore(_)
        )
    }
}

/// Rewrites one `.dockerignore` line as a root-anchored gitignore pattern.
///
/// `main.py` matches only the top-level file, and `event_server/` also
/// matches a plain file of that name, as in Docker.
fn anchor_pattern(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (negated, body) = match line.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, line),
    };
    let body = body.trim_start_matches("./").trim_start_matches('/').trim_end_matches('/');
    if body.is_empty() {
        return None;
    }
    Some(format!("{}/{}", if negated { "!" } else { "" }, body))
}

fn append_bytes<W: std::io::Write>(
    archive: &mut tar::Builder<W>,
    path: &str,
    mode: u32,
    content: &[u8],
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_entry_type(tar::EntryType::Regular);
    archive.append_data(&mut header, path, content)
}

fn context_digest(files: &[ContextFile]) -> Digest {
    let mut builder = DigestBuilder::new("stagebox.context.v1");
    for file in files {
        builder
            .str(&file.path)
            .str(&format!("{:o}", file.mode))
            .digest(&file.digest);
    }
    builder.finish()
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    if metadata.permissions().mode() & 0o111 != 0 {
        0o755
    } else {
        0o644
    }
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}
