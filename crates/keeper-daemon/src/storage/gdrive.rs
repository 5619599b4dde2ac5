//! Google Drive v3 resumable uploads
//!
//! A session is opened with the file metadata, then each chunk is `PUT` to
//! the session URI with a `Content-Range` header. The server answers `308`
//! while it expects more bytes and `200`/`201` with the file resource once
//! the last byte has arrived.

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::token::TokenProvider;
use super::{ChunkSource, RemoteObject, RemoteStorage, StorageError};

pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://www.googleapis.com";

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Per-request timeout; one chunk has to make it within this window.
const REQUEST_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

pub struct GoogleDriveStorage {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    base_url: String,
}

impl GoogleDriveStorage {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Result<Self, StorageError> {
        Self::with_base_url(tokens, DEFAULT_UPLOAD_BASE_URL)
    }

    pub fn with_base_url(
        tokens: Arc<dyn TokenProvider>,
        base_url: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            // 308 is the protocol's "resume incomplete", not a redirect
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            http,
            tokens,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn start_session(
        &self,
        token: &str,
        remote_name: &str,
        folder: &str,
        total: u64,
    ) -> Result<String, StorageError> {
        let mut metadata = json!({ "name": remote_name });
        if !folder.is_empty() {
            metadata["parents"] = json!([folder]);
        }

        let response = self
            .http
            .post(format!("{}/upload/drive/v3/files", self.base_url))
            .query(&[("uploadType", "resumable"), ("fields", "id,name")])
            .bearer_auth(token)
            .header("X-Upload-Content-Type", ARCHIVE_CONTENT_TYPE)
            .header("X-Upload-Content-Length", total.to_string())
            .json(&metadata)
            .send()
            .await?;

        let response = reject_unsuccessful(response).await?;

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StorageError::Protocol("resumable session response has no Location header".to_string()))
    }

    async fn put_chunk(
        &self,
        token: &str,
        session: &str,
        content_range: String,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, StorageError> {
        Ok(self
            .http
            .put(session)
            .bearer_auth(token)
            .header(header::CONTENT_RANGE, content_range)
            .body(body)
            .send()
            .await?)
    }
}

#[async_trait]
impl RemoteStorage for GoogleDriveStorage {
    fn kind(&self) -> &'static str {
        "gdrive"
    }

    #[instrument(skip(self, source), fields(total = source.total_len()))]
    async fn upload(
        &self,
        remote_name: &str,
        folder: &str,
        source: &mut ChunkSource,
    ) -> Result<RemoteObject, StorageError> {
        let total = source.total_len();
        let token = self.tokens.access_token().await?;
        let session = self.start_session(&token, remote_name, folder, total).await?;
        debug!("Resumable session opened");

        if total == 0 {
            let response = self
                .put_chunk(&token, &session, "bytes */0".to_string(), bytes::Bytes::new())
                .await?;
            return finish(response, total).await;
        }

        while let Some(chunk) = source.next_chunk().await? {
            let end = source.offset();
            let start = end - chunk.len() as u64;
            let range = format!("bytes {}-{}/{}", start, end - 1, total);

            let response = self.put_chunk(&token, &session, range, chunk).await?;

            if response.status() == StatusCode::PERMANENT_REDIRECT {
                check_committed(&response, end)?;
                debug!(uploaded = end, total, "Chunk accepted");
                continue;
            }

            if end < total {
                return Err(unexpected(response).await);
            }
            return finish(response, total).await;
        }

        Err(StorageError::Protocol(
            "upload ended without a completion response".to_string(),
        ))
    }
}

/// On a `308`, the `Range` header must cover everything sent so far. A
/// missing header means nothing has been persisted yet.
fn check_committed(response: &reqwest::Response, sent: u64) -> Result<(), StorageError> {
    let committed = match response.headers().get(header::RANGE) {
        None => Some(0),
        Some(range) => range
            .to_str()
            .ok()
            .and_then(|r| r.strip_prefix("bytes=0-"))
            .and_then(|last| last.parse::<u64>().ok())
            .map(|last| last + 1),
    };

    match committed {
        Some(n) if n == sent => Ok(()),
        Some(n) => Err(StorageError::Protocol(format!(
            "server committed {} of {} bytes sent",
            n, sent
        ))),
        None => Err(StorageError::Protocol(format!(
            "unparseable Range header after {} bytes sent",
            sent
        ))),
    }
}

async fn finish(response: reqwest::Response, total: u64) -> Result<RemoteObject, StorageError> {
    let status = response.status();
    if status != StatusCode::OK && status != StatusCode::CREATED {
        return Err(unexpected(response).await);
    }

    let file: DriveFile = response.json().await?;
    Ok(RemoteObject {
        id: file.id,
        name: file.name,
        size: total,
    })
}

async fn reject_unsuccessful(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(unexpected(response).await)
    }
}

async fn unexpected(response: reqwest::Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::Rejected { status, body }
}
