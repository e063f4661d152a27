//! Runtime settings from the environment

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::DEFAULT_CONFIG_PATH;
use crate::error::{IngestError, Result};
use crate::fetch::DEFAULT_HTTP_TIMEOUT_SECS;
use crate::orchestrator::{FailurePolicy, DEFAULT_BLOB_DIR};
use crate::schema::DEFAULT_SCHEMA_DIR;
use crate::storage::StorageConfig;

pub const DEFAULT_DATASET: &str = "fantasy_premier_league";

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Endpoint declarations
    pub config_path: PathBuf,
    pub schema_dir: PathBuf,
    /// Warehouse dataset receiving every table
    pub dataset: String,
    /// Top-level directory for staged objects
    pub blob_dir: String,
    pub storage: StorageConfig,
    pub http_timeout_secs: u64,
    #[serde(skip)]
    pub failure_policy: FailurePolicy,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let failure_policy = match std::env::var("FPL_FAILURE_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => FailurePolicy::default(),
        };

        let settings = Self {
            config_path: std::env::var("FPL_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
            schema_dir: std::env::var("FPL_SCHEMA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SCHEMA_DIR)),
            dataset: std::env::var("DATASET").unwrap_or_else(|_| DEFAULT_DATASET.to_string()),
            blob_dir: std::env::var("BLOB_DIR").unwrap_or_else(|_| DEFAULT_BLOB_DIR.to_string()),
            storage: StorageConfig::from_env()?,
            http_timeout_secs: env_number("FPL_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            failure_policy,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dataset.is_empty() {
            return Err(IngestError::InvalidConfig("DATASET cannot be empty".to_string()));
        }
        if self.blob_dir.trim_matches('/').is_empty() {
            return Err(IngestError::InvalidConfig("BLOB_DIR cannot be empty".to_string()));
        }
        if self.http_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "FPL_HTTP_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        self.storage.validate()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Parse a numeric variable, falling back to `default` when unset
fn env_number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            IngestError::InvalidConfig(format!("{name} must be a positive integer, got '{value}'"))
        }),
        Err(_) => Ok(default),
    }
}
