//! Content-hash manifest of the output tree.
//!
//! After a build, every non-empty file under the output directory is hashed
//! (SHA-1, hex) and recorded under its remote key:
//!
//! ```json
//! {
//!   "manifest": {
//!     "posts": "bf21a9e8fbc5a3846fb05b4fa0859e0917b2202f",
//!     "posts/abc": "…",
//!     "galleries/iceland/dawn.jpg": "…"
//!   },
//!   "updated_at": "2023-06-01T12:00:00Z"
//! }
//! ```
//!
//! ## Remote keys
//!
//! The key is the path relative to the output root with `/` separators,
//! minus a trailing `.json`, with the configured prefix prepended
//! (`site/posts/abc`). The same rule is used by the sync stage, so the
//! manifest names exactly the keys a sync writes.
//!
//! SHA-1 is what both remote stores record per object, so the manifest
//! hash can be compared against them directly.
//!
//! The manifest is regenerated from scratch on every run; nothing is read
//! back from a previous `manifest.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// File name of the manifest within the output directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// SHA-1 of a byte slice as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha1::digest(bytes))
}

/// SHA-1 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(hash_bytes(&bytes))
}

/// Normalize a user-supplied prefix to `""` or `"segment/.../"`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Remote key for `path` under `root`, or `None` if `path` is outside it.
///
/// `prefix` must already be normalized.
pub fn remote_key(root: &Path, path: &Path, prefix: &str) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        return None;
    }
    let key = joined.strip_suffix(".json").unwrap_or(&joined);
    Some(format!("{prefix}{key}"))
}

/// MIME type sent with the object. JSON documents lose their extension in
/// the key, so the type is decided from the local path.
pub fn content_type(path: &Path) -> String {
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        return "application/json".to_string();
    }
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// A publishable file found in the output tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub len: u64,
}

/// Every non-empty regular file under `root`, in file-name order.
///
/// `manifest.json` at the root is included; callers that must not see it
/// filter on [`is_manifest`].
pub fn output_files(root: &Path) -> impl Iterator<Item = Result<OutputFile, walkdir::Error>> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) if !e.file_type().is_file() => None,
            Ok(e) => match e.metadata() {
                Ok(meta) if meta.len() == 0 => None,
                Ok(meta) => Some(Ok(OutputFile {
                    path: e.into_path(),
                    len: meta.len(),
                })),
                Err(err) => Some(Err(err)),
            },
            Err(err) => Some(Err(err)),
        })
}

pub fn is_manifest(root: &Path, path: &Path) -> bool {
    path == root.join(MANIFEST_FILENAME)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub sha1: String,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub entries: BTreeMap<String, ManifestEntry>,
    pub updated_at: DateTime<Utc>,
}

/// On-disk shape.
#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestFile {
    pub manifest: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl Manifest {
    /// Hash every file under `root`.
    pub fn generate(root: &Path, prefix: &str) -> Result<Self, ManifestError> {
        let prefix = normalize_prefix(prefix);
        let mut entries = BTreeMap::new();
        for file in output_files(root) {
            let file = file?;
            if is_manifest(root, &file.path) {
                continue;
            }
            let Some(key) = remote_key(root, &file.path, &prefix) else {
                continue;
            };
            let sha1 = hash_file(&file.path).map_err(|source| ManifestError::Io {
                path: file.path.clone(),
                source,
            })?;
            let replaced = entries.insert(
                key.clone(),
                ManifestEntry {
                    sha1,
                    content_type: content_type(&file.path),
                },
            );
            if replaced.is_some() {
                tracing::warn!(%key, path = %file.path.display(), "two files map to the same key");
            }
        }
        Ok(Self {
            entries,
            updated_at: Utc::now(),
        })
    }

    pub fn to_file(&self) -> ManifestFile {
        ManifestFile {
            manifest: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.sha1.clone()))
                .collect(),
            updated_at: self.updated_at,
        }
    }

    /// Write `manifest.json` into `root`.
    pub fn save(&self, root: &Path) -> Result<PathBuf, ManifestError> {
        let path = root.join(MANIFEST_FILENAME);
        let json = serde_json::to_string_pretty(&self.to_file())?;
        fs::write(&path, json).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_file;
    use tempfile::TempDir;

    #[test]
    fn hash_file_deterministic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.bin");
        fs::write(&path, b"hello world").unwrap();

        let h1 = hash_file(&path).unwrap();
        let h2 = hash_file(&path).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[test]
    fn hash_file_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.bin");

        fs::write(&path, b"version 1").unwrap();
        let h1 = hash_file(&path).unwrap();

        fs::write(&path, b"version 2").unwrap();
        let h2 = hash_file(&path).unwrap();

        assert_ne!(h1, h2);
    }

    #[test]
    fn prefix_normalization() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix("site"), "site/");
        assert_eq!(normalize_prefix("/site/v2/"), "site/v2/");
    }

    #[test]
    fn remote_key_strips_json_and_prepends_prefix() {
        let root = Path::new("/out");
        assert_eq!(
            remote_key(root, &root.join("posts/page/2.json"), "").as_deref(),
            Some("posts/page/2")
        );
        assert_eq!(
            remote_key(root, &root.join("posts.json"), "site/").as_deref(),
            Some("site/posts")
        );
        assert_eq!(
            remote_key(root, &root.join("galleries/iceland/dawn.jpg"), "").as_deref(),
            Some("galleries/iceland/dawn.jpg")
        );
        assert_eq!(
            remote_key(root, &root.join("feeds/atom.xml"), "").as_deref(),
            Some("feeds/atom.xml")
        );
        assert_eq!(remote_key(root, Path::new("/elsewhere/x.json"), ""), None);
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Path::new("posts/abc.json")), "application/json");
        assert_eq!(content_type(Path::new("a/dawn.jpg")), "image/jpeg");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
        assert_eq!(content_type(Path::new("feeds/feed.rss")), "application/rss+xml");
    }

    #[test]
    fn every_non_empty_file_has_one_entry() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "posts.json", "{}");
        write_file(tmp.path(), "posts/abc.json", "{\"a\":1}");
        write_file(tmp.path(), "archives/posts/2023/june.json", "[]");
        write_file(tmp.path(), "galleries/iceland/dawn.jpg", "jpg");
        write_file(tmp.path(), "empty.json", "");
        write_file(tmp.path(), MANIFEST_FILENAME, "{\"stale\":true}");

        let m = Manifest::generate(tmp.path(), "").unwrap();
        let keys: Vec<&str> = m.entries.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "archives/posts/2023/june",
                "galleries/iceland/dawn.jpg",
                "posts",
                "posts/abc",
            ]
        );
        assert_eq!(m.entries["posts"].sha1, hash_bytes(b"{}"));
        assert_eq!(m.entries["galleries/iceland/dawn.jpg"].content_type, "image/jpeg");
    }

    #[test]
    fn generate_is_deterministic() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "a.json", "1");
        write_file(tmp.path(), "b/c.json", "2");
        let m1 = Manifest::generate(tmp.path(), "p").unwrap();
        let m2 = Manifest::generate(tmp.path(), "p").unwrap();
        assert_eq!(m1.entries, m2.entries);
        assert!(m1.entries.contains_key("p/b/c"));
    }

    #[test]
    fn save_writes_manifest_shape() {
        let tmp = TempDir::new().unwrap();
        write_file(tmp.path(), "posts.json", "{}");
        let m = Manifest::generate(tmp.path(), "").unwrap();
        let path = m.save(tmp.path()).unwrap();

        let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(v["manifest"]["posts"], hash_bytes(b"{}"));
        assert!(v["updated_at"].is_string());

        // the saved manifest does not list itself on the next run
        let again = Manifest::generate(tmp.path(), "").unwrap();
        assert_eq!(again.len(), 1);
    }

    #[test]
    fn empty_tree_gives_empty_manifest() {
        let tmp = TempDir::new().unwrap();
        assert!(Manifest::generate(tmp.path(), "").unwrap().is_empty());
    }
}
