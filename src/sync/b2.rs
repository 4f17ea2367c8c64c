//! Backblaze B2 object store, native API (v2).
//!
//! ```text
//! GET  {api}/b2api/v2/b2_authorize_account   basic auth → token, apiUrl, downloadUrl
//! POST {apiUrl}/b2api/v2/b2_list_buckets     bucketName → bucketId
//! HEAD {downloadUrl}/file/{bucket}/{key}     x-bz-content-sha1
//! POST {apiUrl}/b2api/v2/b2_get_upload_url   bucketId → uploadUrl + upload token
//! POST {uploadUrl}                           the object
//! ```
//!
//! Upload URLs are fetched per upload; they are cheap and a fresh one per
//! worker call avoids sharing a URL between concurrent uploads.

use super::{RemoteStore, SyncError, Upload};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.backblazeb2.com";

const SHA1_HEADER: &str = "x-bz-content-sha1";

#[derive(Debug, Clone)]
pub struct B2Credentials {
    pub account_id: String,
    pub application_key: String,
    pub bucket: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Authorization {
    account_id: String,
    authorization_token: String,
    api_url: String,
    download_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketList {
    buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bucket {
    bucket_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadTarget {
    upload_url: String,
    authorization_token: String,
}

pub struct B2Store {
    client: Client,
    bucket: String,
    bucket_id: String,
    api_url: String,
    download_url: String,
    token: String,
}

impl B2Store {
    /// Authorize the account and resolve the bucket id.
    pub async fn connect(credentials: &B2Credentials, timeout: Duration) -> Result<Self, SyncError> {
        Self::connect_to(DEFAULT_API_URL, credentials, timeout).await
    }

    pub async fn connect_to(
        api_base: &str,
        credentials: &B2Credentials,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = Client::builder().timeout(timeout).build()?;
        Self::connect_with(client, api_base, credentials).await
    }

    pub async fn connect_with(
        client: Client,
        api_base: &str,
        credentials: &B2Credentials,
    ) -> Result<Self, SyncError> {
        let url = format!("{}/b2api/v2/b2_authorize_account", api_base.trim_end_matches('/'));
        let auth: Authorization = checked(
            client
                .get(&url)
                .basic_auth(&credentials.account_id, Some(&credentials.application_key))
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        let url = format!("{}/b2api/v2/b2_list_buckets", auth.api_url);
        let list: BucketList = checked(
            client
                .post(&url)
                .header(AUTHORIZATION, &auth.authorization_token)
                .json(&json!({
                    "accountId": auth.account_id,
                    "bucketName": credentials.bucket,
                }))
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;
        let bucket_id = list
            .buckets
            .into_iter()
            .next()
            .map(|b| b.bucket_id)
            .ok_or_else(|| SyncError::Config(format!("bucket {:?} not found", credentials.bucket)))?;

        tracing::info!(bucket = %credentials.bucket, "authorized with b2");
        Ok(Self {
            client,
            bucket: credentials.bucket.clone(),
            bucket_id,
            api_url: auth.api_url,
            download_url: auth.download_url,
            token: auth.authorization_token,
        })
    }

    async fn upload_target(&self) -> Result<UploadTarget, SyncError> {
        let url = format!("{}/b2api/v2/b2_get_upload_url", self.api_url);
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, &self.token)
            .json(&json!({ "bucketId": self.bucket_id }))
            .send()
            .await?;
        Ok(checked(response).await?.json().await?)
    }
}

impl RemoteStore for B2Store {
    fn name(&self) -> &'static str {
        "b2"
    }

    async fn remote_sha1(&self, key: &str) -> Result<Option<String>, SyncError> {
        let url = file_url(&self.download_url, &self.bucket, key);
        let response = self
            .client
            .head(&url)
            .header(AUTHORIZATION, &self.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = checked(response).await?;
        Ok(response
            .headers()
            .get(SHA1_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_sha1))
    }

    async fn put(&self, upload: Upload) -> Result<(), SyncError> {
        let target = self.upload_target().await?;
        let response = self
            .client
            .post(&target.upload_url)
            .header(AUTHORIZATION, target.authorization_token)
            .header("X-Bz-File-Name", encode_key(&upload.key))
            .header(CONTENT_TYPE, upload.content_type)
            .header(CONTENT_LENGTH, upload.body.len())
            .header("X-Bz-Content-Sha1", upload.sha1)
            .body(upload.body)
            .send()
            .await?;
        checked(response).await?;
        Ok(())
    }
}

/// Turn a non-success response into [`SyncError::Status`].
async fn checked(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Status {
        url,
        status: status.as_u16(),
        body,
    })
}

/// Percent-encode each path segment, keeping the `/` separators.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn file_url(download_url: &str, bucket: &str, key: &str) -> String {
    format!(
        "{}/file/{}/{}",
        download_url.trim_end_matches('/'),
        urlencoding::encode(bucket),
        encode_key(key)
    )
}

/// B2 reports `unverified:<hex>` for client-computed hashes and `none` for
/// large files.
pub fn parse_content_sha1(header: &str) -> Option<String> {
    let value = header.trim();
    let value = value.strip_prefix("unverified:").unwrap_or(value);
    if value.is_empty() || value == "none" {
        return None;
    }
    Some(value.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::hash_bytes;
    use crate::test_helpers::{StubResponse, StubServer, direct_client};
    use serde_json::json;

    #[test]
    fn encode_key_keeps_separators() {
        assert_eq!(encode_key("posts/page/2"), "posts/page/2");
        assert_eq!(
            encode_key("galleries/café au lait/1.jpg"),
            "galleries/caf%C3%A9%20au%20lait/1.jpg"
        );
    }

    #[test]
    fn file_url_shape() {
        assert_eq!(
            file_url("https://f002.backblazeb2.com/", "my-site", "posts/abc"),
            "https://f002.backblazeb2.com/file/my-site/posts/abc"
        );
    }

    #[test]
    fn sha1_header_variants() {
        let hex = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";
        assert_eq!(parse_content_sha1(hex).as_deref(), Some(hex));
        assert_eq!(
            parse_content_sha1(&format!("unverified:{hex}")).as_deref(),
            Some(hex)
        );
        assert_eq!(
            parse_content_sha1(&hex.to_uppercase()).as_deref(),
            Some(hex)
        );
        assert_eq!(parse_content_sha1("none"), None);
        assert_eq!(parse_content_sha1(""), None);
    }

    #[test]
    fn authorization_response_parses() {
        let body = r#"{
            "accountId": "acc",
            "authorizationToken": "tok",
            "apiUrl": "https://api002.backblazeb2.com",
            "downloadUrl": "https://f002.backblazeb2.com",
            "recommendedPartSize": 100000000
        }"#;
        let auth: Authorization = serde_json::from_str(body).unwrap();
        assert_eq!(auth.api_url, "https://api002.backblazeb2.com");
        assert_eq!(auth.authorization_token, "tok");
    }

    #[test]
    fn upload_target_parses() {
        let body = r#"{"bucketId": "b", "uploadUrl": "https://pod/upload", "authorizationToken": "up"}"#;
        let target: UploadTarget = serde_json::from_str(body).unwrap();
        assert_eq!(target.upload_url, "https://pod/upload");
        assert_eq!(target.authorization_token, "up");
    }

    const KNOWN_SHA1: &str = "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed";

    async fn b2_server() -> StubServer {
        StubServer::start(|req, base| match (req.method.as_str(), req.path.as_str()) {
            ("GET", "/b2api/v2/b2_authorize_account") => StubResponse::json(
                200,
                json!({
                    "accountId": "acc",
                    "authorizationToken": "account-token",
                    "apiUrl": base,
                    "downloadUrl": base,
                }),
            ),
            ("POST", "/b2api/v2/b2_list_buckets") => {
                StubResponse::json(200, json!({"buckets": [{"bucketId": "bucket-1"}]}))
            }
            ("HEAD", "/file/site/posts/known") => StubResponse::status(200)
                .header("x-bz-content-sha1", &format!("unverified:{KNOWN_SHA1}")),
            ("HEAD", "/file/site/posts/broken") => StubResponse::status(500),
            ("POST", "/b2api/v2/b2_get_upload_url") => StubResponse::json(
                200,
                json!({
                    "bucketId": "bucket-1",
                    "uploadUrl": format!("{base}/upload/pod-1"),
                    "authorizationToken": "upload-token",
                }),
            ),
            ("POST", "/upload/pod-1") => StubResponse::json(200, json!({"fileId": "f1"})),
            _ => StubResponse::status(404),
        })
        .await
    }

    fn credentials() -> B2Credentials {
        B2Credentials {
            account_id: "acc".into(),
            application_key: "key".into(),
            bucket: "site".into(),
        }
    }

    #[tokio::test]
    async fn connect_authorizes_and_resolves_bucket() {
        let server = b2_server().await;
        let store = B2Store::connect_with(direct_client(), &server.url, &credentials())
            .await
            .unwrap();
        assert_eq!(store.bucket_id, "bucket-1");
        assert_eq!(store.token, "account-token");

        let auth = &server.requests_to("GET", "/b2api/v2/b2_authorize_account")[0];
        assert!(auth.header("authorization").unwrap().starts_with("Basic "));
        let list = &server.requests_to("POST", "/b2api/v2/b2_list_buckets")[0];
        assert_eq!(list.header("authorization"), Some("account-token"));
        assert_eq!(list.json()["bucketName"], "site");
    }

    #[tokio::test]
    async fn remote_sha1_over_http() {
        let server = b2_server().await;
        let store = B2Store::connect_with(direct_client(), &server.url, &credentials())
            .await
            .unwrap();

        assert_eq!(
            store.remote_sha1("posts/known").await.unwrap().as_deref(),
            Some(KNOWN_SHA1)
        );
        assert_eq!(store.remote_sha1("posts/missing").await.unwrap(), None);
        let err = store.remote_sha1("posts/broken").await.unwrap_err();
        assert!(matches!(err, SyncError::Status { status: 500, .. }), "{err}");
    }

    #[tokio::test]
    async fn upload_sends_b2_headers() {
        let server = b2_server().await;
        let store = B2Store::connect_with(direct_client(), &server.url, &credentials())
            .await
            .unwrap();
        let body = b"{\"data\":{}}".to_vec();
        store
            .put(Upload {
                key: "galleries/café/1".into(),
                content_type: "application/json".into(),
                sha1: hash_bytes(&body),
                body: body.clone(),
            })
            .await
            .unwrap();

        let upload = &server.requests_to("POST", "/upload/pod-1")[0];
        assert_eq!(upload.header("authorization"), Some("upload-token"));
        assert_eq!(upload.header("x-bz-file-name"), Some("galleries/caf%C3%A9/1"));
        assert_eq!(upload.header("x-bz-content-sha1"), Some(hash_bytes(&body).as_str()));
        assert_eq!(upload.header("content-type"), Some("application/json"));
        assert_eq!(upload.header("content-length"), Some(body.len().to_string().as_str()));
        assert_eq!(upload.body, body);
    }

    #[tokio::test]
    async fn failed_authorization_is_a_status_error() {
        let server = StubServer::start(|_, _| StubResponse::status(401)).await;
        let err = B2Store::connect_with(direct_client(), &server.url, &credentials())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Status { status: 401, .. }), "{err}");
    }
}
