//! Storage backend selection and upload settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::{env_optional, env_parsed, env_string};

/// Default upload chunk size in MiB.
pub const DEFAULT_CHUNK_SIZE_MB: usize = 10;

/// Smallest part S3 accepts for every part but the last.
pub const S3_MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Drive resumable uploads require chunk sizes in multiples of this.
pub const GDRIVE_CHUNK_ALIGNMENT: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    GoogleDrive,
    S3,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gdrive" | "googledrive" | "google-drive" | "drive" => Ok(StorageBackend::GoogleDrive),
            "s3" | "minio" => Ok(StorageBackend::S3),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub chunk_size_mb: usize,
    pub gdrive: GoogleDriveConfig,
    pub s3: S3Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleDriveConfig {
    pub credentials_file: Option<PathBuf>,
    pub token_file: PathBuf,
    /// Target folder id; empty uploads to the drive root
    pub folder_id: String,
}

/// S3-compatible target; bucket plus prefix play the role of the folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static keys; when absent the default AWS credential chain is used
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub prefix: String,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        let backend = env_optional("STORAGE_BACKEND")
            .and_then(|s| match s.parse() {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!("{}, falling back to gdrive", e);
                    None
                },
            })
            .unwrap_or_default();

        Self {
            backend,
            chunk_size_mb: env_parsed("STORAGE_CHUNK_SIZE_MB", DEFAULT_CHUNK_SIZE_MB),
            gdrive: GoogleDriveConfig::from_env(),
            s3: S3Config::from_env(),
        }
    }

    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size_mb == 0 {
            anyhow::bail!("STORAGE_CHUNK_SIZE_MB must be greater than 0");
        }

        match self.backend {
            StorageBackend::GoogleDrive => {
                if self.gdrive.credentials_file.is_none() {
                    anyhow::bail!("GOOGLE_DRIVE_CREDENTIALS_FILE must be set for the gdrive backend");
                }
                if self.chunk_size_bytes() % GDRIVE_CHUNK_ALIGNMENT != 0 {
                    anyhow::bail!("STORAGE_CHUNK_SIZE_MB must be a multiple of 256 KiB");
                }
            },
            StorageBackend::S3 => {
                if self.s3.bucket.is_empty() {
                    anyhow::bail!("S3_BUCKET cannot be empty");
                }
                if self.chunk_size_bytes() < S3_MIN_PART_SIZE {
                    anyhow::bail!("STORAGE_CHUNK_SIZE_MB must be at least 5 for the s3 backend");
                }
                if self.s3.access_key.is_some() != self.s3.secret_key.is_some() {
                    anyhow::bail!("S3_ACCESS_KEY and S3_SECRET_KEY must be set together");
                }
            },
        }

        Ok(())
    }
}

impl GoogleDriveConfig {
    pub fn from_env() -> Self {
        Self {
            credentials_file: env_optional("GOOGLE_DRIVE_CREDENTIALS_FILE").map(PathBuf::from),
            token_file: PathBuf::from(env_string("GOOGLE_DRIVE_TOKEN_FILE", "token.json")),
            folder_id: env_string("GOOGLE_DRIVE_FOLDER_ID", ""),
        }
    }
}

impl S3Config {
    pub fn from_env() -> Self {
        Self {
            endpoint: env_optional("S3_ENDPOINT"),
            region: env_string("S3_REGION", "us-east-1"),
            bucket: env_string("S3_BUCKET", ""),
            access_key: env_optional("S3_ACCESS_KEY"),
            secret_key: env_optional("S3_SECRET_KEY"),
            path_style: env_parsed("S3_PATH_STYLE", false),
            prefix: env_string("S3_PREFIX", ""),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            prefix: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::GoogleDrive,
            chunk_size_mb: DEFAULT_CHUNK_SIZE_MB,
            gdrive: GoogleDriveConfig {
                credentials_file: Some(PathBuf::from("credentials.json")),
                token_file: PathBuf::from("token.json"),
                folder_id: String::new(),
            },
            s3: S3Config {
                endpoint: None,
                region: "us-east-1".to_string(),
                bucket: String::new(),
                access_key: None,
                secret_key: None,
                path_style: false,
                prefix: String::new(),
            },
        }
    }
}
