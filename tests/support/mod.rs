//! Shared helpers for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Writes a small Python project into a fresh temporary directory
pub fn python_project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    write_files(dir.path(), files);
    dir
}

/// The project most tests start from: one pinned dependency and an entry file
pub fn hello_project() -> TempDir {
    python_project(&[
        ("requirements.txt", "requests==2.31.0\n"),
        (
            "main.py",
            "import requests\nprint('hello from', requests.__version__)\n",
        ),
    ])
}

pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(&full, content).expect("Failed to write fixture file");
    }
}
