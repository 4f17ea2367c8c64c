//! Content tree walking.
//!
//! Stage 1 of the build. Walks the source tree for one content kind and
//! streams parsed items over a bounded channel from a producer thread:
//!
//! ```text
//! content/                          # Content root
//! ├── publish.toml                  # Site configuration (optional)
//! ├── posts/
//! │   ├── README.md                 # Ignored
//! │   ├── one-week-off-grid.md      # One post per markdown file
//! │   └── 2018/winter-notes.md      # Subdirectories are fine
//! └── galleries/
//!     └── iceland/                  # Album directory
//!         ├── iceland.md            # Album index (must match the dir name)
//!         ├── falls.md              # One photo per markdown file
//!         └── falls.jpg             # Asset picked up by stem
//! ```
//!
//! Hidden entries, `node_modules` and `.DS_Store` are never visited. Entries
//! are visited in file-name order so runs are reproducible, but output order
//! is decided by the collector's sort, not by the walk.
//!
//! ## Errors
//!
//! Per-item problems (unparseable file, album without an index) travel down
//! the channel as `Err` records and the walk continues. A missing or
//! unreadable root is [fatal](ScanError::is_fatal): it is sent as the last
//! record and the channel closes.

use crate::content::{self, Album, ParseError, Photo, Post};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use walkdir::WalkDir;

/// Bound on parsed-but-unconsumed items.
pub const QUEUE_CAPACITY: usize = 64;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("content directory not found: {0}")]
    MissingRoot(PathBuf),
    #[error("cannot read content directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Parse { path: PathBuf, source: ParseError },
    #[error("album directory {0} has no {1}")]
    MissingAlbumIndex(PathBuf, String),
    #[error("photo {0} references missing image {1}")]
    MissingImage(PathBuf, PathBuf),
}

impl ScanError {
    /// Fatal errors end the traversal; everything else only loses one item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::MissingRoot(_) | ScanError::Unreadable { .. }
        )
    }
}

type Record<T> = Result<T, ScanError>;

/// The consuming side of one traversal.
pub struct Ingest<T> {
    receiver: Receiver<Record<T>>,
    producer: JoinHandle<()>,
}

impl<T> Ingest<T> {
    /// Hand every record to `f` in arrival order. Returns once the producer
    /// has closed the channel and been joined.
    pub fn drain(self, mut f: impl FnMut(Record<T>)) {
        let Ingest { receiver, producer } = self;
        for record in receiver {
            f(record);
        }
        if producer.join().is_err() {
            tracing::error!("content walker thread panicked");
        }
    }
}

/// Receiver went away; stop walking.
struct Hangup;

fn emit<T>(tx: &SyncSender<Record<T>>, record: Record<T>) -> Result<(), Hangup> {
    tx.send(record).map_err(|_| Hangup)
}

fn spawn<T, F>(root: &Path, walk: F) -> Ingest<T>
where
    T: Send + 'static,
    F: FnOnce(&Path, &SyncSender<Record<T>>) -> Result<(), Hangup> + Send + 'static,
{
    let (tx, receiver) = mpsc::sync_channel(QUEUE_CAPACITY);
    let root = root.to_path_buf();
    let producer = thread::spawn(move || {
        if walk(&root, &tx).is_err() {
            tracing::debug!(root = %root.display(), "walk stopped early, consumer hung up");
        }
    });
    Ingest { receiver, producer }
}

/// Stream every post under `root`.
pub fn spawn_posts(root: &Path) -> Ingest<Post> {
    spawn(root, walk_posts)
}

/// Stream every album (with its photos) under `root`.
pub fn spawn_galleries(root: &Path) -> Ingest<Album> {
    spawn(root, walk_galleries)
}

fn walk_posts(root: &Path, tx: &SyncSender<Record<Post>>) -> Result<(), Hangup> {
    walk(root, tx, |entry| {
        if !entry.file_type().is_file() || !is_content_file(entry.path()) {
            return None;
        }
        Some(read_post(entry.path()))
    })
}

fn walk_galleries(root: &Path, tx: &SyncSender<Record<Album>>) -> Result<(), Hangup> {
    walk(root, tx, |entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return None;
        }
        read_album(entry.path()).transpose()
    })
}

/// Shared traversal: root check, exclusion filter, deterministic order,
/// fatal/non-fatal split of walk errors.
fn walk<T>(
    root: &Path,
    tx: &SyncSender<Record<T>>,
    mut visit: impl FnMut(&walkdir::DirEntry) -> Option<Record<T>>,
) -> Result<(), Hangup> {
    if !root.is_dir() {
        return emit(tx, Err(ScanError::MissingRoot(root.to_path_buf())));
    }

    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e.file_name()));

    for entry in walker {
        match entry {
            Ok(entry) => {
                if let Some(record) = visit(&entry) {
                    emit(tx, record)?;
                }
            }
            Err(err) if err.depth() == 0 => {
                return emit(
                    tx,
                    Err(ScanError::Unreadable {
                        path: root.to_path_buf(),
                        source: err,
                    }),
                );
            }
            Err(err) => emit(tx, Err(ScanError::Walk(err)))?,
        }
    }
    Ok(())
}

fn is_excluded(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name == "node_modules"
}

fn is_content_file(path: &Path) -> bool {
    let is_md = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("md"))
        .unwrap_or(false);
    is_md && path.file_name() != Some(OsStr::new("README.md"))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|e| {
            let e = e.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

fn parse_file(path: &Path) -> Result<content::Parsed, ScanError> {
    let raw = fs::read(path).map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    content::parse(&raw).map_err(|source| ScanError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_post(path: &Path) -> Result<Post, ScanError> {
    Post::from_parsed(parse_file(path)?).map_err(|source| ScanError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Build the album held in `dir`, or `None` if it holds no markdown.
///
/// A photo that fails to parse fails the whole album.
fn read_album(dir: &Path) -> Result<Option<Album>, ScanError> {
    let io_err = |source| ScanError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_file() || is_excluded(&entry.file_name()) {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();

    let markdown: Vec<&PathBuf> = files.iter().filter(|p| is_content_file(p)).collect();
    if markdown.is_empty() {
        return Ok(None);
    }
    let images: BTreeMap<String, &PathBuf> = files
        .iter()
        .filter(|p| is_image(p))
        .map(|p| (file_stem(p), p))
        .collect();

    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let index_name = format!("{dir_name}.md");
    let index = markdown
        .iter()
        .find(|p| p.file_name() == Some(OsStr::new(&index_name)))
        .ok_or_else(|| ScanError::MissingAlbumIndex(dir.to_path_buf(), index_name.clone()))?;

    let mut album = Album::from_parsed(parse_file(index)?).map_err(|source| ScanError::Parse {
        path: index.to_path_buf(),
        source,
    })?;
    if album.slug.is_empty() {
        album.slug = dir_name;
    }

    let mut photos = Vec::with_capacity(markdown.len() - 1);
    for path in markdown.iter().filter(|p| **p != *index) {
        let parsed = parse_file(path)?;
        let stem = file_stem(path);
        let source_image = match parsed.front.image.as_deref() {
            Some(name) => {
                let image = dir.join(name);
                if !image.is_file() {
                    return Err(ScanError::MissingImage(path.to_path_buf(), image));
                }
                Some(image)
            }
            None => images.get(&stem).map(|p| p.to_path_buf()),
        };
        let photo = Photo::from_parsed(parsed, &stem, &album, source_image).map_err(|source| {
            ScanError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        photos.push(photo);
    }

    Ok(Some(album.with_photos(photos)))
}
