//! S3-compatible storage using multipart uploads
//!
//! One part per chunk, sent in order. Any failure after the upload has been
//! created aborts it so no orphaned parts are billed.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use super::config::S3Config;
use super::{ChunkSource, RemoteObject, RemoteStorage, StorageError};

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

fn s3_error<E: std::error::Error>(err: E) -> StorageError {
    StorageError::S3(DisplayErrorContext(err).to_string())
}

/// Object key for `name` under `prefix`, without duplicate separators.
pub fn object_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

impl S3Storage {
    pub async fn new(config: &S3Config) -> Result<Self, StorageError> {
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing S3 storage");

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(access_key, secret_key, None, None, "backup-keeper");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            },
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!("S3 storage initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    async fn create_upload(&self, key: &str) -> Result<String, StorageError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/zip")
            .send()
            .await
            .map_err(s3_error)?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::S3("no upload id returned".to_string()))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedPart, StorageError> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(s3_error)?;

        let etag = response
            .e_tag()
            .ok_or_else(|| StorageError::S3(format!("no ETag returned for part {part_number}")))?;

        Ok(CompletedPart::builder()
            .part_number(part_number)
            .e_tag(etag)
            .build())
    }

    async fn send_parts(
        &self,
        key: &str,
        upload_id: &str,
        source: &mut ChunkSource,
    ) -> Result<(), StorageError> {
        let mut parts = Vec::new();

        while let Some(chunk) = source.next_chunk().await? {
            let part_number = parts.len() as i32 + 1;
            parts.push(self.upload_part(key, upload_id, part_number, chunk).await?);
            debug!(part_number, uploaded = source.offset(), "Part uploaded");
        }

        // A multipart upload needs at least one part
        if parts.is_empty() {
            parts.push(self.upload_part(key, upload_id, 1, Bytes::new()).await?);
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(s3_error)?;

        Ok(())
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;

        if let Err(e) = result {
            warn!(key, error = %DisplayErrorContext(e), "Failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl RemoteStorage for S3Storage {
    fn kind(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self, source), fields(bucket = %self.bucket, total = source.total_len()))]
    async fn upload(
        &self,
        remote_name: &str,
        folder: &str,
        source: &mut ChunkSource,
    ) -> Result<RemoteObject, StorageError> {
        let key = object_key(folder, remote_name);
        let upload_id = self.create_upload(&key).await?;

        if let Err(e) = self.send_parts(&key, &upload_id, source).await {
            self.abort(&key, &upload_id).await;
            return Err(e);
        }

        info!("Uploaded to s3://{}/{}", self.bucket, key);

        Ok(RemoteObject {
            id: key,
            name: remote_name.to_string(),
            size: source.offset(),
        })
    }
}
