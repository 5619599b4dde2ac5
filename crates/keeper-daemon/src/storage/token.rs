//! Access tokens for authenticated storage backends
//!
//! [`OAuthTokenProvider`] works from two files: the OAuth client
//! credentials downloaded from the cloud console, and a token file holding
//! an access token and a refresh token. The token file has to be produced
//! once by an interactive authorization outside the daemon; from then on the
//! access token is refreshed here and written back to the same file.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::StorageError;

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 60;

const TOKEN_REQUEST_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A bearer token that is valid right now.
    async fn access_token(&self) -> Result<String, StorageError>;
}

/// A fixed token, for tests and short-lived tooling
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, StorageError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

#[derive(Debug, Clone, Deserialize)]
struct ClientSecret {
    client_id: String,
    client_secret: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// Token file contents, compatible with the common `token.json` layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl StoredToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_MARGIN_SECS) > now,
            None => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct OAuthTokenProvider {
    http: reqwest::Client,
    client: ClientSecret,
    token_file: PathBuf,
    current: Mutex<StoredToken>,
}

impl OAuthTokenProvider {
    /// Load client credentials and the cached token.
    ///
    /// A missing token file is a configuration error: the daemon never runs
    /// the interactive consent flow itself.
    pub fn from_files(credentials_file: &Path, token_file: &Path) -> Result<Self, StorageError> {
        let raw = std::fs::read(credentials_file).map_err(|e| {
            StorageError::Config(format!(
                "cannot read credentials file {}: {}",
                credentials_file.display(),
                e
            ))
        })?;
        let credentials: CredentialsFile = serde_json::from_slice(&raw).map_err(|e| {
            StorageError::Config(format!("invalid credentials file {}: {}", credentials_file.display(), e))
        })?;
        let client = credentials.installed.or(credentials.web).ok_or_else(|| {
            StorageError::Config(format!(
                "credentials file {} has neither an 'installed' nor a 'web' section",
                credentials_file.display()
            ))
        })?;

        if !token_file.exists() {
            return Err(StorageError::Config(format!(
                "token file {} not found; authorize the application once and store the resulting token there",
                token_file.display()
            )));
        }
        let raw = std::fs::read(token_file)?;
        let token: StoredToken = serde_json::from_slice(&raw).map_err(|e| {
            StorageError::Config(format!("invalid token file {}: {}", token_file.display(), e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(TOKEN_REQUEST_TIMEOUT_SECS))
            .build()?;

        debug!(token_file = %token_file.display(), "OAuth token loaded");

        Ok(Self {
            http,
            client,
            token_file: token_file.to_path_buf(),
            current: Mutex::new(token),
        })
    }

    async fn refresh(&self, token: &StoredToken) -> Result<StoredToken, StorageError> {
        let refresh_token = token.refresh_token.as_deref().ok_or_else(|| {
            StorageError::Auth("access token expired and no refresh token is available".to_string())
        })?;

        let response = self
            .http
            .post(&self.client.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Auth(format!("token refresh failed ({status}): {body}")));
        }

        let refreshed: RefreshResponse = response.json().await?;

        Ok(StoredToken {
            access_token: refreshed.access_token,
            token_type: refreshed.token_type.unwrap_or_else(|| token.token_type.clone()),
            refresh_token: refreshed.refresh_token.or_else(|| token.refresh_token.clone()),
            expiry: refreshed
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        })
    }

    async fn persist(&self, token: &StoredToken) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(token)
            .map_err(|e| StorageError::Protocol(format!("cannot serialize token: {e}")))?;
        tokio::fs::write(&self.token_file, body).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.token_file, std::fs::Permissions::from_mode(0o600)).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn access_token(&self) -> Result<String, StorageError> {
        let mut current = self.current.lock().await;
        if current.is_fresh(Utc::now()) {
            return Ok(current.access_token.clone());
        }

        let refreshed = self.refresh(&current).await?;
        info!("OAuth access token refreshed");

        if let Err(e) = self.persist(&refreshed).await {
            warn!(token_file = %self.token_file.display(), error = %e, "Failed to persist refreshed token");
        }

        *current = refreshed;
        Ok(current.access_token.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn write_files(dir: &Path, token_uri: &str, token: serde_json::Value) -> (PathBuf, PathBuf) {
        let credentials = dir.join("credentials.json");
        std::fs::write(
            &credentials,
            json!({
                "installed": {
                    "client_id": "client-1",
                    "client_secret": "s3cret",
                    "token_uri": token_uri,
                }
            })
            .to_string(),
        )
        .unwrap();
        let token_file = dir.join("token.json");
        std::fs::write(&token_file, token.to_string()).unwrap();
        (credentials, token_file)
    }

    #[tokio::test]
    async fn test_fresh_token_is_not_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let expiry = (Utc::now() + Duration::hours(1)).to_rfc3339();
        let (credentials, token_file) = write_files(
            dir.path(),
            &format!("{}/token", server.uri()),
            json!({ "access_token": "still-good", "refresh_token": "r1", "expiry": expiry }),
        );

        let provider = OAuthTokenProvider::from_files(&credentials, &token_file).unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "still-good");
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "brand-new",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (credentials, token_file) = write_files(
            dir.path(),
            &format!("{}/token", server.uri()),
            json!({
                "access_token": "stale",
                "refresh_token": "r1",
                "expiry": "2020-01-01T00:00:00Z"
            }),
        );

        let provider = OAuthTokenProvider::from_files(&credentials, &token_file).unwrap();
        assert_eq!(provider.access_token().await.unwrap(), "brand-new");
        // Cached after the first refresh
        assert_eq!(provider.access_token().await.unwrap(), "brand-new");

        let stored: StoredToken =
            serde_json::from_slice(&std::fs::read(&token_file).unwrap()).unwrap();
        assert_eq!(stored.access_token, "brand-new");
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&token_file).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (credentials, token_file) = write_files(
            dir.path(),
            &format!("{}/token", server.uri()),
            json!({ "access_token": "stale", "refresh_token": "revoked" }),
        );

        let provider = OAuthTokenProvider::from_files(&credentials, &token_file).unwrap();
        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, StorageError::Auth(ref m) if m.contains("invalid_grant")));
    }

    #[test]
    fn test_missing_token_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (credentials, token_file) = write_files(dir.path(), "http://unused", json!({}));
        std::fs::remove_file(&token_file).unwrap();

        let result = OAuthTokenProvider::from_files(&credentials, &token_file);
        assert!(matches!(result, Err(StorageError::Config(ref m)) if m.contains("not found")));
    }

    #[test]
    fn test_web_credentials_section_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = dir.path().join("credentials.json");
        std::fs::write(
            &credentials,
            json!({ "web": { "client_id": "c", "client_secret": "s" } }).to_string(),
        )
        .unwrap();
        let token_file = dir.path().join("token.json");
        std::fs::write(&token_file, json!({ "access_token": "a" }).to_string()).unwrap();

        let provider = OAuthTokenProvider::from_files(&credentials, &token_file).unwrap();
        assert_eq!(provider.client.token_uri, default_token_uri());
    }
}
