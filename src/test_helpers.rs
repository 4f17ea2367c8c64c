//! Shared test utilities for the publish test suite.
//!
//! Provides fixture setup, markdown builders, a drain helper for walks, an
//! in-memory [`RemoteStore`] that records every upload, and a loopback HTTP
//! server for exercising the real store clients.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_fixtures();
//! let (posts, errors) = drain_all(spawn_posts(&tmp.path().join("posts")));
//! assert!(errors.is_empty());
//!
//! let store = Arc::new(MemoryStore::failing_on(["posts/abc"]));
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::content::{Post, parse_timestamp, render_markdown};
use crate::scan::{Ingest, ScanError};
use crate::sync::{FlushReport, RemoteStore, SyncError, Upload};

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/content/` to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate without affecting other tests
/// or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/content");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Number of regular files under `root`, at any depth.
pub fn count_files(root: &Path) -> usize {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

// =========================================================================
// Content builders
// =========================================================================

/// A published post whose title is its slug.
pub fn post_md(slug: &str, date: &str) -> String {
    format!("---\nslug: {slug}\ntitle: {slug}\npublished-at: {date}\n---\nBody of {slug}.\n")
}

/// An album index file.
pub fn album_md(slug: &str, date: &str) -> String {
    format!("---\nslug: {slug}\ntitle: {slug}\npublished-at: {date}\n---\nAlbum {slug}.\n")
}

/// A post built in memory, skipping the walk.
pub fn post(slug: &str, date: &str) -> Post {
    Post {
        slug: slug.to_string(),
        title: slug.to_string(),
        description: String::new(),
        draft: false,
        published_at: parse_timestamp(date).unwrap(),
        body: render_markdown(&format!("Body of {slug}.")),
    }
}

/// Drain a walk, splitting items from errors.
pub fn drain_all<T>(ingest: Ingest<T>) -> (Vec<T>, Vec<ScanError>) {
    let mut items = Vec::new();
    let mut errors = Vec::new();
    ingest.drain(|record| match record {
        Ok(item) => items.push(item),
        Err(err) => errors.push(err),
    });
    (items, errors)
}

// =========================================================================
// In-memory store
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub sha1: String,
    pub body: Vec<u8>,
}

/// Records uploads behind a mutex, like a bucket that never loses writes.
///
/// `fail_keys` make `put` error for those keys; `flush_failures` is the
/// number of entries the next flush reports as lost.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub objects: Mutex<BTreeMap<String, StoredObject>>,
    pub fail_keys: HashSet<String>,
    pub flush_failures: usize,
    pub puts: AtomicUsize,
    pub flushes: AtomicUsize,
}

impl MemoryStore {
    pub fn failing_on<const N: usize>(keys: [&str; N]) -> Self {
        Self {
            fail_keys: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl RemoteStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn remote_sha1(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.object(key).map(|o| o.sha1))
    }

    async fn put(&self, upload: Upload) -> Result<(), SyncError> {
        if self.fail_keys.contains(&upload.key) {
            return Err(SyncError::Api(format!("refusing {}", upload.key)));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(
            upload.key,
            StoredObject {
                content_type: upload.content_type,
                sha1: upload.sha1,
                body: upload.body,
            },
        );
        Ok(())
    }

    async fn flush(&self) -> Result<FlushReport, SyncError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        let stored = self.objects.lock().unwrap().len();
        Ok(FlushReport {
            sent: stored.saturating_sub(self.flush_failures),
            failed: self.flush_failures,
        })
    }
}

// =========================================================================
// Loopback HTTP server
// =========================================================================

/// One request as the server saw it. Header names are lowercased.
#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl StubRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl StubResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            body: body.to_string(),
            ..Self::status(status)
        }
        .header("Content-Type", "application/json")
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// Answers every connection with `handler(request, base_url)` and closes
/// it. Requests are recorded in arrival order.
pub struct StubServer {
    pub url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl StubServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&StubRequest, &str) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(handler);

        let base = url.clone();
        let log = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let log = Arc::clone(&log);
                let base = base.clone();
                tokio::spawn(async move {
                    let _ = serve_one(socket, handler.as_ref(), &base, &log).await;
                });
            }
        });
        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, method: &str, path: &str) -> Vec<StubRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

async fn serve_one<F>(
    socket: TcpStream,
    handler: &F,
    base: &str,
    log: &Mutex<Vec<StubRequest>>,
) -> std::io::Result<()>
where
    F: Fn(&StubRequest, &str) -> StubResponse,
{
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = BTreeMap::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;

    let request = StubRequest {
        method,
        path,
        headers,
        body,
    };
    let response = handler(&request, base);
    let is_head = request.method == "HEAD";
    log.lock().unwrap().push(request);

    let mut out = format!(
        "HTTP/1.1 {} Stub\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.body.len()
    );
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    if !is_head {
        out.push_str(&response.body);
    }
    write.write_all(out.as_bytes()).await?;
    write.shutdown().await
}

/// A client that never routes loopback traffic through a proxy.
pub fn direct_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
