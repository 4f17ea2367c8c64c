//! Writing documents and assets into the output tree.
//!
//! Each output path has exactly one writer per build, so no locking is
//! needed here; callers parallelise across distinct paths.

use crate::jsonapi::Document;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON error for {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("refusing to write {name:?}: not a single path segment")]
    UnsafeName { name: String },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn ensure_parent(path: &Path) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    Ok(())
}

/// Serialize `doc` to `path`, creating parent directories as needed.
pub fn write_document(path: &Path, doc: &Document) -> Result<(), ArtifactError> {
    let mut bytes = serde_json::to_vec(doc).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');
    ensure_parent(path)?;
    fs::write(path, bytes).map_err(io_error(path))
}

/// Copy a file verbatim, creating parent directories as needed.
pub fn copy_asset(source: &Path, target: &Path) -> Result<u64, ArtifactError> {
    ensure_parent(target)?;
    fs::copy(source, target).map_err(io_error(source))
}

/// Output-relative `/`-separated path → filesystem path under `root`.
pub fn output_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(root.to_path_buf(), |p, segment| p.join(segment))
}
