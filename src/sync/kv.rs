//! Cloudflare Workers KV bulk store.
//!
//! Existing hashes come from per-key metadata; writes are buffered and sent
//! through the bulk endpoint. A batch goes out from `put` as soon as it
//! reaches [`BatchLimits`] (entry count or encoded bytes), and whatever is
//! left is sent when the pool flushes, so memory stays bounded by one batch.
//!
//! ```json
//! PUT .../storage/kv/namespaces/{ns}/bulk
//! [{"key": "posts/abc", "value": "eyJkYXRhIjp7fX0=", "base64": true,
//!   "metadata": {"content-type": "application/json", "sha1": "…"}}]
//! ```

use super::{FlushReport, RemoteStore, SyncError, Upload};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.cloudflare.com/client/v4";

/// Hard limit of the bulk endpoint.
pub const MAX_BULK_ENTRIES: usize = 10_000;

/// The endpoint caps a request at 100 MB; stay well below it.
pub const MAX_BULK_BYTES: usize = 64 * 1024 * 1024;

/// When a buffered batch is sent without waiting for flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub entries: usize,
    pub bytes: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            entries: MAX_BULK_ENTRIES,
            bytes: MAX_BULK_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvAuth {
    Token(String),
    Key { email: String, key: String },
}

impl KvAuth {
    /// A token wins over an email/key pair.
    pub fn from_parts(
        token: Option<String>,
        email: Option<String>,
        key: Option<String>,
    ) -> Result<Self, SyncError> {
        match (token, email, key) {
            (Some(token), _, _) if !token.is_empty() => Ok(KvAuth::Token(token)),
            (_, Some(email), Some(key)) if !email.is_empty() && !key.is_empty() => {
                Ok(KvAuth::Key { email, key })
            }
            _ => Err(SyncError::Config(
                "KV needs KV_API_TOKEN, or KV_EMAIL and KV_API_KEY".into(),
            )),
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            KvAuth::Token(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            KvAuth::Key { email, key } => request
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", key),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KvCredentials {
    pub account_id: String,
    pub namespace_id: String,
    pub auth: KvAuth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(rename = "content-type")]
    pub content_type: String,
    pub sha1: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkEntry {
    pub key: String,
    pub value: String,
    pub base64: bool,
    pub metadata: EntryMetadata,
}

impl BulkEntry {
    /// Approximate size on the wire.
    pub fn encoded_len(&self) -> usize {
        self.key.len() + self.value.len() + self.metadata.content_type.len() + self.metadata.sha1.len()
    }
}

impl From<Upload> for BulkEntry {
    fn from(upload: Upload) -> Self {
        Self {
            key: upload.key,
            value: STANDARD.encode(&upload.body),
            base64: true,
            metadata: EntryMetadata {
                content_type: upload.content_type,
                sha1: upload.sha1,
            },
        }
    }
}

/// A request body for the bulk endpoint. Never holds more than
/// [`MAX_BULK_ENTRIES`].
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct BulkBatch(Vec<BulkEntry>);

impl BulkBatch {
    pub fn new(entries: Vec<BulkEntry>) -> Result<Self, SyncError> {
        if entries.len() > MAX_BULK_ENTRIES {
            return Err(SyncError::BatchTooLarge {
                len: entries.len(),
                max: MAX_BULK_ENTRIES,
            });
        }
        Ok(Self(entries))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Split `entries` into batches the endpoint accepts.
pub fn batches(mut entries: Vec<BulkEntry>) -> Vec<BulkBatch> {
    let mut out = Vec::with_capacity(entries.len().div_ceil(MAX_BULK_ENTRIES));
    while !entries.is_empty() {
        let rest = entries.split_off(entries.len().min(MAX_BULK_ENTRIES));
        out.push(BulkBatch(entries));
        entries = rest;
    }
    out
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    message: String,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<Option<T>, SyncError> {
        if self.success {
            return Ok(self.result);
        }
        let messages: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{} ({})", e.message, e.code))
            .collect();
        Err(SyncError::Api(messages.join("; ")))
    }
}

#[derive(Debug, Deserialize)]
struct StoredMetadata {
    sha1: Option<String>,
}

/// Entries waiting for the next bulk request.
#[derive(Debug, Default)]
struct Pending {
    entries: Vec<BulkEntry>,
    bytes: usize,
}

impl Pending {
    /// Queue `entry`, handing back the whole buffer once it reaches `limits`.
    fn push(&mut self, entry: BulkEntry, limits: BatchLimits) -> Option<Vec<BulkEntry>> {
        self.bytes += entry.encoded_len();
        self.entries.push(entry);
        if self.entries.len() >= limits.entries || self.bytes >= limits.bytes {
            Some(self.take())
        } else {
            None
        }
    }

    fn take(&mut self) -> Vec<BulkEntry> {
        self.bytes = 0;
        std::mem::take(&mut self.entries)
    }
}

pub struct KvStore {
    client: Client,
    namespace_url: String,
    auth: KvAuth,
    limits: BatchLimits,
    pending: Mutex<Pending>,
    sent: AtomicUsize,
    failed: AtomicUsize,
}

impl KvStore {
    pub fn new(credentials: KvCredentials, timeout: Duration) -> Result<Self, SyncError> {
        Self::with_api_url(DEFAULT_API_URL, credentials, timeout)
    }

    pub fn with_api_url(
        api_url: &str,
        credentials: KvCredentials,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url, credentials))
    }

    pub fn with_client(client: Client, api_url: &str, credentials: KvCredentials) -> Self {
        Self {
            client,
            namespace_url: format!(
                "{}/accounts/{}/storage/kv/namespaces/{}",
                api_url.trim_end_matches('/'),
                credentials.account_id,
                credentials.namespace_id
            ),
            auth: credentials.auth,
            limits: BatchLimits::default(),
            pending: Mutex::new(Pending::default()),
            sent: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn with_batch_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    fn metadata_url(&self, key: &str) -> String {
        format!("{}/metadata/{}", self.namespace_url, urlencoding::encode(key))
    }

    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pending(&self) -> Vec<BulkEntry> {
        self.pending().take()
    }

    /// Send `entries`, tallying the outcome for the flush report.
    async fn send_all(&self, entries: Vec<BulkEntry>) {
        for batch in batches(entries) {
            match self.send_batch(&batch).await {
                Ok(()) => {
                    tracing::info!(entries = batch.len(), "kv bulk write accepted");
                    self.sent.fetch_add(batch.len(), Ordering::SeqCst);
                }
                Err(err) => {
                    tracing::error!(entries = batch.len(), error = %err, "kv bulk write failed");
                    self.failed.fetch_add(batch.len(), Ordering::SeqCst);
                }
            }
        }
    }

    async fn send_batch(&self, batch: &BulkBatch) -> Result<(), SyncError> {
        let url = format!("{}/bulk", self.namespace_url);
        let response = self
            .auth
            .apply(self.client.put(&url))
            .json(batch)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Status {
                url,
                status: status.as_u16(),
                body: text,
            });
        }
        let parsed: ApiResponse<serde_json::Value> = serde_json::from_str(&text)?;
        parsed.into_result().map(|_| ())
    }
}

impl RemoteStore for KvStore {
    fn name(&self) -> &'static str {
        "kv"
    }

    async fn remote_sha1(&self, key: &str) -> Result<Option<String>, SyncError> {
        let url = self.metadata_url(key);
        let response = self.auth.apply(self.client.get(&url)).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SyncError::Status {
                url,
                status: status.as_u16(),
                body: text,
            });
        }
        parse_metadata_response(&text)
    }

    /// Buffers the entry; a full buffer is sent before returning. A failed
    /// batch is reported by [`flush`](RemoteStore::flush), not here.
    async fn put(&self, upload: Upload) -> Result<(), SyncError> {
        let full = self.pending().push(BulkEntry::from(upload), self.limits);
        if let Some(entries) = full {
            self.send_all(entries).await;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<FlushReport, SyncError> {
        let rest = self.take_pending();
        self.send_all(rest).await;
        Ok(FlushReport {
            sent: self.sent.swap(0, Ordering::SeqCst),
            failed: self.failed.swap(0, Ordering::SeqCst),
        })
    }
}

fn parse_metadata_response(text: &str) -> Result<Option<String>, SyncError> {
    let parsed: ApiResponse<StoredMetadata> = serde_json::from_str(text)?;
    Ok(parsed.into_result()?.and_then(|m| m.sha1))
}
