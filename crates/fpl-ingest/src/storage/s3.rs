use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

use super::config::StorageConfig;
use super::{ObjectHandle, ObjectStorage};
use crate::error::{IngestError, Result};

/// S3-compatible object storage
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) else {
            return Err(IngestError::InvalidConfig(
                "S3 storage needs S3_ACCESS_KEY and S3_SECRET_KEY".to_string(),
            ));
        };
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing S3 storage");

        let credentials = Credentials::new(access_key, secret_key, None, None, "fpl-ingest");
        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(bucket = %config.bucket, "Storage client initialized");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        })
    }

    pub fn with_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    fn handle(&self, key: &str) -> ObjectHandle {
        ObjectHandle {
            key: key.to_string(),
            uri: format!("s3://{}/{}", self.bucket, key),
        }
    }

    #[instrument(skip(self, data))]
    async fn write_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<ObjectHandle> {
        debug!("Uploading {} bytes to s3://{}/{}", data.len(), self.bucket, key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| IngestError::storage(format!("failed to upload {key}: {e}")))?;

        info!("Successfully uploaded to s3://{}/{}", self.bucket, key);
        Ok(self.handle(key))
    }

    #[instrument(skip(self))]
    async fn read(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&handle.key)
            .send()
            .await
            .map_err(|e| IngestError::storage(format!("failed to download {}: {e}", handle.uri)))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| IngestError::storage(format!("failed to read {}: {e}", handle.uri)))?
            .into_bytes()
            .to_vec();
        debug!("Downloaded {} bytes from {}", data.len(), handle.uri);
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn exists(&self, handle: &ObjectHandle) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&handle.key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(IngestError::storage(format!(
                "failed to check existence of {}: {e}",
                handle.uri
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectHandle>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| IngestError::storage(format!("failed to list {prefix}: {e}")))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                },
                _ => break,
            }
        }

        keys.sort();
        debug!(prefix, count = keys.len(), "Listed objects");
        Ok(keys.iter().map(|k| self.handle(k)).collect())
    }
}
