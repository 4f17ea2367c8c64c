//! Hash-aware sync of the output tree to a remote store.
//!
//! ```text
//!   output tree ──walk (blocking)──▶ bounded queue ──▶ worker 1 ─┐
//!                                                 ├─▶ worker 2 ─┼─▶ RemoteStore
//!                                                 └─▶ worker N ─┘
//! ```
//!
//! One blocking producer walks the output tree exactly once and feeds
//! [`SyncTask`]s into a bounded channel. `N` worker tasks share the
//! receiving end; each one reads the file, hashes it, asks the store for the
//! hash it holds under the same key, and only transfers on mismatch. Errors
//! are logged and counted per task and never stop the pool.
//!
//! When every worker has seen the queue close, the store is flushed (the KV
//! store sends its final partial batch here) and the per-worker counters are
//! summed into one [`SyncStats`].
//!
//! Two runs over an unchanged tree against an unchanged remote transfer
//! nothing on the second run. Rebuilding between runs changes the tree:
//! `manifest.json` records the build time in `updated_at`, and a feed with
//! no entries takes the build time as its `updated`, so those objects go
//! up again after every build even when no content changed. The
//! check-then-write is not atomic, so two overlapping runs can upload the
//! same object twice; the result is the same bytes either way.
//!
//! The workers own the only receivers. If they all die, the walk stops
//! queueing and counts what is left as failed.

pub mod b2;
pub mod kv;

use crate::config::{self, SyncConfig};
use crate::manifest;
use std::fmt;
use std::future::Future;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

/// Pending tasks buffered between the walk and the workers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("remote API error: {0}")]
    Api(String),
    #[error("batch of {len} entries exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },
    #[error("sync configuration error: {0}")]
    Config(String),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One file to bring up to date on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTask {
    pub local: PathBuf,
    pub key: String,
    pub content_type: String,
}

/// A transfer the store must perform.
#[derive(Debug, Clone)]
pub struct Upload {
    pub key: String,
    pub content_type: String,
    /// Hex SHA-1 of `body`.
    pub sha1: String,
    pub body: Vec<u8>,
}

/// Outcome of [`RemoteStore::flush`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub failed: usize,
}

/// A destination the output tree can be synced to.
///
/// Implementations must be shareable across worker tasks.
pub trait RemoteStore: Send + Sync + 'static {
    /// Short name for logs ("b2", "kv").
    fn name(&self) -> &'static str;

    /// Hex SHA-1 currently stored under `key`, or `None` if absent.
    fn remote_sha1(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, SyncError>> + Send;

    /// Transfer one object. Bulk stores may buffer until [`flush`](Self::flush).
    fn put(&self, upload: Upload) -> impl Future<Output = Result<(), SyncError>> + Send;

    /// Send anything still buffered. Called once after all workers finish.
    fn flush(&self) -> impl Future<Output = Result<FlushReport, SyncError>> + Send {
        async { Ok(FlushReport::default()) }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub workers: usize,
    pub prefix: String,
    pub queue_capacity: usize,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            workers: config::effective_workers(config),
            prefix: config.prefix.clone(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Summary of one sync run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub uploaded: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl SyncStats {
    pub fn total(&self) -> u32 {
        self.uploaded + self.skipped + self.failed
    }
}

impl AddAssign for SyncStats {
    fn add_assign(&mut self, other: Self) {
        self.uploaded += other.uploaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} uploaded, {} unchanged, {} failed ({} total)",
            self.uploaded,
            self.skipped,
            self.failed,
            self.total()
        )
    }
}

enum Outcome {
    Uploaded,
    Unchanged,
}

/// Sync every file under `root` to `store`.
pub async fn sync_tree<S: RemoteStore>(
    store: Arc<S>,
    root: &Path,
    options: &SyncOptions,
) -> Result<SyncStats, SyncError> {
    let workers = options.workers.max(1);
    let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
    let queue = Arc::new(Mutex::new(rx));

    let walk_root = root.to_path_buf();
    let prefix = manifest::normalize_prefix(&options.prefix);
    let producer = tokio::task::spawn_blocking(move || enqueue(&walk_root, &prefix, &tx));

    let mut pool = JoinSet::new();
    for id in 0..workers {
        pool.spawn(worker(id, Arc::clone(&store), Arc::clone(&queue)));
    }
    // The workers hold the only receivers, so the walk stops once they are gone.
    drop(queue);
    tracing::info!(store = store.name(), workers, root = %root.display(), "sync started");

    let mut stats = SyncStats::default();
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(worker_stats) => stats += worker_stats,
            Err(err) => {
                // the task it was holding is lost
                tracing::error!(store = store.name(), error = %err, "sync worker died");
                stats.failed += 1;
            }
        }
    }
    stats.failed += producer.await?;

    match store.flush().await {
        Ok(report) => {
            let lost = report.failed as u32;
            stats.uploaded = stats.uploaded.saturating_sub(lost);
            stats.failed += lost;
        }
        Err(err) => {
            tracing::error!(store = store.name(), error = %err, "flush failed");
            return Err(err);
        }
    }

    tracing::info!(store = store.name(), %stats, "sync finished");
    Ok(stats)
}

/// Walk `root` once, queueing a task per file. Returns the number of
/// entries that could not be read or found no worker left to take them.
fn enqueue(root: &Path, prefix: &str, tx: &mpsc::Sender<SyncTask>) -> u32 {
    let mut unreadable = 0;
    let mut orphaned = 0;
    for file in manifest::output_files(root) {
        let file = match file {
            Ok(file) => file,
            Err(err) => {
                tracing::error!(error = %err, "cannot read output entry");
                unreadable += 1;
                continue;
            }
        };
        let Some(key) = manifest::remote_key(root, &file.path, prefix) else {
            continue;
        };
        let task = SyncTask {
            content_type: manifest::content_type(&file.path),
            local: file.path,
            key,
        };
        if orphaned > 0 || tx.blocking_send(task).is_err() {
            if orphaned == 0 {
                tracing::error!("all sync workers exited, counting the rest as failed");
            }
            orphaned += 1;
        }
    }
    unreadable + orphaned
}

async fn worker<S: RemoteStore>(
    id: usize,
    store: Arc<S>,
    queue: Arc<Mutex<mpsc::Receiver<SyncTask>>>,
) -> SyncStats {
    let mut stats = SyncStats::default();
    loop {
        let next = queue.lock().await.recv().await;
        let Some(task) = next else { break };
        let key = task.key.clone();
        match process(store.as_ref(), task).await {
            Ok(Outcome::Uploaded) => stats.uploaded += 1,
            Ok(Outcome::Unchanged) => stats.skipped += 1,
            Err(err) => {
                tracing::error!(store = store.name(), worker = id, %key, error = %err, "sync failed");
                stats.failed += 1;
            }
        }
    }
    tracing::debug!(store = store.name(), worker = id, %stats, "worker done");
    stats
}

async fn process<S: RemoteStore>(store: &S, task: SyncTask) -> Result<Outcome, SyncError> {
    let body = tokio::fs::read(&task.local)
        .await
        .map_err(|source| SyncError::Io {
            path: task.local.clone(),
            source,
        })?;
    let sha1 = manifest::hash_bytes(&body);

    if store.remote_sha1(&task.key).await?.as_deref() == Some(sha1.as_str()) {
        tracing::debug!(store = store.name(), key = %task.key, "unchanged");
        return Ok(Outcome::Unchanged);
    }

    tracing::debug!(store = store.name(), key = %task.key, bytes = body.len(), "uploading");
    store
        .put(Upload {
            key: task.key,
            content_type: task.content_type,
            sha1,
            body,
        })
        .await?;
    Ok(Outcome::Uploaded)
}
