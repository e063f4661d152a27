//! Table derivation from cached payloads
//!
//! Derivation is a lookup of the named sub-collection followed by the
//! transform bound to the table, if any. Transforms are plain functions with
//! no side effects; an unbound table passes through unchanged.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

use crate::config::AppConfig;
use crate::error::{IngestError, Result};
use crate::table::{value_to_rows, Payload, Table};

pub type TransformFn = fn(Table) -> Result<Table>;

pub const PARSE_KICKOFF_TIME: &str = "parse_kickoff_time";
pub const KICKOFF_TIME_COLUMN: &str = "kickoff_time";

/// Named transforms available to table declarations
#[derive(Debug, Clone)]
pub struct TransformRegistry {
    transforms: HashMap<String, TransformFn>,
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut registry = Self {
            transforms: HashMap::new(),
        };
        registry.register(PARSE_KICKOFF_TIME, parse_kickoff_time);
        registry
    }
}

impl TransformRegistry {
    pub fn register(&mut self, name: impl Into<String>, transform: TransformFn) {
        self.transforms.insert(name.into(), transform);
    }

    pub fn get(&self, name: &str) -> Option<TransformFn> {
        self.transforms.get(name).copied()
    }
}

/// Derives tables from payloads, applying per-table transforms
#[derive(Debug, Clone, Default)]
pub struct TableDeriver {
    registry: TransformRegistry,
    /// (endpoint id, table name) -> transform name
    bindings: HashMap<(String, String), String>,
}

impl TableDeriver {
    pub fn new(registry: TransformRegistry) -> Self {
        Self {
            registry,
            bindings: HashMap::new(),
        }
    }

    /// Built-in bindings plus every `transform:` declared in `config`
    ///
    /// Unknown transform names are rejected here rather than at derive time.
    pub fn from_config(config: &AppConfig, registry: TransformRegistry) -> Result<Self> {
        let mut deriver = Self::new(registry).with_default_bindings();
        for endpoint in &config.api.endpoints {
            for table in &endpoint.tables {
                if let Some(transform) = &table.transform {
                    deriver.bind(&endpoint.id, &table.name, transform)?;
                }
            }
        }
        Ok(deriver)
    }

    pub fn with_default_bindings(mut self) -> Self {
        self.bindings.insert(
            ("fixtures".to_string(), "fixtures".to_string()),
            PARSE_KICKOFF_TIME.to_string(),
        );
        self
    }

    pub fn bind(&mut self, endpoint: &str, table: &str, transform: &str) -> Result<()> {
        if self.registry.get(transform).is_none() {
            return Err(IngestError::InvalidConfig(format!(
                "table '{endpoint}.{table}' names unknown transform '{transform}'"
            )));
        }
        self.bindings
            .insert((endpoint.to_string(), table.to_string()), transform.to_string());
        Ok(())
    }

    pub fn derive(&self, endpoint: &str, payload: &Payload, table: &str) -> Result<Table> {
        let value = payload
            .get(table)
            .ok_or_else(|| IngestError::unknown_table(endpoint, table))?;
        let derived = Table::new(table, value_to_rows(table, value)?);

        match self.bindings.get(&(endpoint.to_string(), table.to_string())) {
            Some(name) => {
                let transform = self.registry.get(name).ok_or_else(|| {
                    IngestError::InvalidConfig(format!("transform '{name}' is not registered"))
                })?;
                trace!(table, transform = %name, "Applying transform");
                transform(derived)
            },
            None => Ok(derived),
        }
    }
}

/// Parse API timestamps: RFC 3339, or a naive date-time taken as UTC
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Normalise a text column to RFC 3339 UTC; `null` stays `null`
pub fn parse_datetime_column(mut table: Table, column: &str) -> Result<Table> {
    let failed = |reason: String| IngestError::Transform {
        transform: format!("parse_datetime({column})"),
        reason,
    };

    for row in table.rows.iter_mut() {
        let Some(value) = row.get_mut(column) else {
            continue;
        };
        match value {
            Value::Null => {},
            Value::String(text) => {
                let ts = parse_timestamp(text)
                    .ok_or_else(|| failed(format!("cannot parse '{text}' as a date-time")))?;
                *value = Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true));
            },
            other => return Err(failed(format!("expected text, got {other}"))),
        }
    }
    Ok(table)
}

pub fn parse_kickoff_time(table: Table) -> Result<Table> {
    parse_datetime_column(table, KICKOFF_TIME_COLUMN)
}
