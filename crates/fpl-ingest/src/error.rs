//! Error types for the ingestion core

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Non-2xx response or transport failure while fetching an endpoint
    #[error("Fetching endpoint '{endpoint}' failed: {reason}")]
    FetchFailed { endpoint: String, reason: String },

    #[error("Endpoint '{0}' is not cached")]
    NotCached(String),

    #[error("No fetcher registered for endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("Endpoint '{endpoint}' has no table '{table}'")]
    UnknownTable { endpoint: String, table: String },

    #[error("Table '{0}' is not tabular")]
    NotTabular(String),

    /// Endpoint declaration lacks required keys; raised before any network call
    #[error("Endpoint configuration for '{endpoint}' missing required values {missing:?}")]
    ConfigMissingKeys {
        endpoint: String,
        missing: Vec<String>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load schema '{reference}': {reason}")]
    SchemaLoadFailed { reference: String, reason: String },

    #[error("Verification of '{table_id}' failed: {reason}")]
    VerificationFailed { table_id: String, reason: String },

    #[error("The following teams are out of index: {0:?}")]
    InvalidTeams(Vec<u32>),

    #[error("Transform '{transform}' failed: {reason}")]
    Transform { transform: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl IngestError {
    pub fn fetch_failed(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::FetchFailed {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unknown_table(endpoint: impl Into<String>, table: impl Into<String>) -> Self {
        Self::UnknownTable {
            endpoint: endpoint.into(),
            table: table.into(),
        }
    }

    pub fn schema_load_failed(reference: impl Into<String>, reason: impl ToString) -> Self {
        Self::SchemaLoadFailed {
            reference: reference.into(),
            reason: reason.to_string(),
        }
    }

    pub fn verification_failed(table_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::VerificationFailed {
            table_id: table_id.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(msg: impl ToString) -> Self {
        Self::Storage(msg.to_string())
    }

    pub fn warehouse(msg: impl ToString) -> Self {
        Self::Warehouse(msg.to_string())
    }

    pub fn codec(msg: impl ToString) -> Self {
        Self::Codec(msg.to_string())
    }

    /// Short machine-readable name of the variant, used in run reports
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::FetchFailed { .. } => "fetch_failed",
            IngestError::NotCached(_) => "not_cached",
            IngestError::UnknownEndpoint(_) => "unknown_endpoint",
            IngestError::UnknownTable { .. } => "unknown_table",
            IngestError::NotTabular(_) => "not_tabular",
            IngestError::ConfigMissingKeys { .. } => "config_missing_keys",
            IngestError::InvalidConfig(_) => "invalid_config",
            IngestError::SchemaLoadFailed { .. } => "schema_load_failed",
            IngestError::VerificationFailed { .. } => "verification_failed",
            IngestError::InvalidTeams(_) => "invalid_teams",
            IngestError::Transform { .. } => "transform",
            IngestError::Storage(_) => "storage",
            IngestError::Warehouse(_) => "warehouse",
            IngestError::Codec(_) => "codec",
            IngestError::Io(_) => "io",
            IngestError::Json(_) => "json",
            IngestError::Yaml(_) => "yaml",
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|url| url.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        IngestError::fetch_failed(endpoint, err)
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Warehouse(err.to_string())
    }
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        IngestError::Codec(err.to_string())
    }
}
