//! Warehouse collaborator
//!
//! A warehouse loads staged objects into `dataset.table` destinations and
//! reports when each table last changed. The orchestrator only relies on the
//! three operations of [`Warehouse`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::config::{FileType, LoadConfig};
use crate::error::{IngestError, Result};
use crate::schema::Schema;
use crate::storage::ObjectHandle;

pub mod postgres;

pub use postgres::PostgresWarehouse;

pub const WRITE_DISPOSITION: &str = "write_disposition";
pub const SOURCE_FORMAT: &str = "source_format";

/// Destination table identifier, `dataset.table`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

impl std::str::FromStr for TableId {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((dataset, table)) if !dataset.is_empty() && !table.is_empty() => {
                Ok(Self::new(dataset, table))
            },
            _ => Err(IngestError::InvalidConfig(format!(
                "table id '{s}' is not of the form dataset.table"
            ))),
        }
    }
}

/// Result of a completed load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHandle {
    pub id: TableId,
    pub rows_loaded: u64,
}

/// What a load reads from object storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    Object(ObjectHandle),
    /// Every object whose key starts with the prefix
    Prefix(String),
}

impl LoadSource {
    /// `prefix/*` selects by prefix; anything else names one object
    pub fn from_pattern(pattern: &str, handle: impl FnOnce(&str) -> ObjectHandle) -> Self {
        match pattern.strip_suffix('*') {
            Some(prefix) => LoadSource::Prefix(prefix.to_string()),
            None => LoadSource::Object(handle(pattern)),
        }
    }
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::Object(handle) => f.write_str(&handle.uri),
            LoadSource::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Replace the table contents
    WriteTruncate,
    #[default]
    WriteAppend,
    /// Fail unless the table is empty
    WriteEmpty,
}

impl WriteDisposition {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteDisposition::WriteTruncate => "WRITE_TRUNCATE",
            WriteDisposition::WriteAppend => "WRITE_APPEND",
            WriteDisposition::WriteEmpty => "WRITE_EMPTY",
        }
    }
}

impl std::str::FromStr for WriteDisposition {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "WRITE_TRUNCATE" => Ok(WriteDisposition::WriteTruncate),
            "WRITE_APPEND" => Ok(WriteDisposition::WriteAppend),
            "WRITE_EMPTY" => Ok(WriteDisposition::WriteEmpty),
            other => Err(IngestError::InvalidConfig(format!("unknown write disposition '{other}'"))),
        }
    }
}

/// Typed view of an effective load configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadOptions {
    pub write_disposition: WriteDisposition,
    pub file_type: FileType,
    /// `None` lets the warehouse infer the schema from the rows
    pub schema: Option<Schema>,
    /// Keys this warehouse does not interpret
    pub extra: LoadConfig,
}

impl LoadOptions {
    /// Read recognised keys from `config`; `file_type` applies when
    /// `source_format` is absent
    pub fn from_config(config: &LoadConfig, file_type: FileType) -> Result<Self> {
        let mut extra = config.clone();

        let write_disposition = match extra.remove(WRITE_DISPOSITION) {
            Some(Value::String(s)) => s.parse()?,
            Some(Value::Null) | None => WriteDisposition::default(),
            Some(other) => {
                return Err(IngestError::InvalidConfig(format!(
                    "write_disposition must be text, got {other}"
                )))
            },
        };
        let file_type = match extra.remove(SOURCE_FORMAT) {
            Some(Value::String(s)) => s.parse()?,
            _ => file_type,
        };

        Ok(Self {
            write_disposition,
            file_type,
            schema: None,
            extra,
        })
    }

    pub fn with_schema(mut self, schema: Option<Schema>) -> Self {
        self.schema = schema;
        self
    }

    pub fn autodetect(&self) -> bool {
        self.schema.is_none()
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn load(&self, source: &LoadSource, destination: &TableId, options: &LoadOptions) -> Result<TableHandle>;

    async fn table_exists(&self, table: &TableHandle) -> Result<bool>;

    /// When the table's contents last changed; `None` if never loaded
    async fn last_modified(&self, table: &TableHandle) -> Result<Option<DateTime<Utc>>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_id_display_and_parse() {
        let id: TableId = "fantasy_premier_league.history".parse().unwrap();
        assert_eq!(id, TableId::new("fantasy_premier_league", "history"));
        assert_eq!(id.to_string(), "fantasy_premier_league.history");
        assert!("history".parse::<TableId>().is_err());
    }

    #[test]
    fn test_load_options_from_config() {
        let config: LoadConfig = serde_json::from_value(json!({
            "write_disposition": "WRITE_TRUNCATE",
            "source_format": "CSV",
            "skip_leading_rows": 1
        }))
        .unwrap();
        let options = LoadOptions::from_config(&config, FileType::Json).unwrap();
        assert_eq!(options.write_disposition, WriteDisposition::WriteTruncate);
        assert_eq!(options.file_type, FileType::Csv);
        assert_eq!(options.extra.len(), 1);
        assert!(options.autodetect());
    }

    #[test]
    fn test_load_options_defaults() {
        let options = LoadOptions::from_config(&LoadConfig::new(), FileType::Json).unwrap();
        assert_eq!(options.write_disposition, WriteDisposition::WriteAppend);
        assert_eq!(options.file_type, FileType::Json);
    }

    #[test]
    fn test_unknown_write_disposition() {
        let config: LoadConfig =
            serde_json::from_value(json!({"write_disposition": "WRITE_SOMETIMES"})).unwrap();
        assert!(LoadOptions::from_config(&config, FileType::Csv).is_err());
    }

    #[test]
    fn test_load_source_pattern() {
        let handle = |key: &str| ObjectHandle {
            key: key.to_string(),
            uri: format!("s3://b/{key}"),
        };
        assert_eq!(
            LoadSource::from_pattern("this_season/history/full_refresh/20240302/*", handle),
            LoadSource::Prefix("this_season/history/full_refresh/20240302/".to_string())
        );
        assert!(matches!(
            LoadSource::from_pattern("this_season/teams/1_teams.json", handle),
            LoadSource::Object(_)
        ));
    }
}
