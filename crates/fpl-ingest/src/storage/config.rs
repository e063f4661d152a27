use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{IngestError, Result};

pub const DEFAULT_BUCKET: &str = "fpl-data";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_LOCAL_STORAGE_DIR: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    Local,
}

impl std::str::FromStr for StorageBackend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "local" | "fs" => Ok(StorageBackend::Local),
            other => Err(IngestError::InvalidConfig(format!(
                "unknown storage backend '{other}', expected 's3' or 'local'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub bucket: String,
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
    /// Root directory for the local backend
    pub local_dir: PathBuf,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        let backend = match env::var("FPL_STORAGE") {
            Ok(value) => value.parse()?,
            Err(_) => StorageBackend::default(),
        };

        Ok(Self {
            backend,
            bucket: env::var("BUCKET")
                .or_else(|_| env::var("S3_BUCKET"))
                .unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            local_dir: env::var("FPL_LOCAL_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOCAL_STORAGE_DIR)),
        })
    }

    pub fn local(dir: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::Local,
            bucket: bucket.into(),
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
            local_dir: dir.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(IngestError::InvalidConfig("bucket cannot be empty".to_string()));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(IngestError::InvalidConfig(
                "S3 access key and secret key must be set together".to_string(),
            ));
        }
        Ok(())
    }
}
