//! Warehouse table schemas
//!
//! Schemas are JSON field lists stored as `<schema_dir>/<reference>.json`:
//!
//! ```json
//! [
//!   {"name": "element_id", "type": "INTEGER", "mode": "REQUIRED"},
//!   {"name": "kickoff_time", "type": "TIMESTAMP"}
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{IngestError, Result};

/// Default directory holding schema files
pub const DEFAULT_SCHEMA_DIR: &str = "config/schemas";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: FieldMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sub-fields of RECORD columns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SchemaField>,
}

impl SchemaField {
    pub fn is_required(&self) -> bool {
        self.mode == FieldMode::Required
    }
}

pub type Schema = Vec<SchemaField>;

/// Reads schema files from one directory
#[derive(Debug, Clone)]
pub struct SchemaLoader {
    dir: PathBuf,
}

impl SchemaLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, reference: &str) -> PathBuf {
        self.dir.join(format!("{reference}.json"))
    }

    pub fn load(&self, reference: &str) -> Result<Schema> {
        let path = self.path_for(reference);
        info!(path = %path.display(), "Loading schema");
        let text = std::fs::read_to_string(&path)
            .map_err(|e| IngestError::schema_load_failed(reference, format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| IngestError::schema_load_failed(reference, e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_schema() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("history.json"),
            r#"[
                {"name": "element_id", "type": "INTEGER", "mode": "REQUIRED"},
                {"name": "kickoff_time", "type": "TIMESTAMP", "description": "UTC"},
                {"name": "stats", "type": "RECORD", "mode": "REPEATED",
                 "fields": [{"name": "value", "type": "FLOAT"}]}
            ]"#,
        )
        .unwrap();

        let schema = SchemaLoader::new(dir.path()).load("history").unwrap();
        assert_eq!(schema.len(), 3);
        assert!(schema[0].is_required());
        assert_eq!(schema[1].mode, FieldMode::Nullable);
        assert_eq!(schema[2].fields[0].field_type, "FLOAT");
    }

    #[test]
    fn test_missing_schema_file() {
        let dir = TempDir::new().unwrap();
        let err = SchemaLoader::new(dir.path()).load("teams").unwrap_err();
        assert!(matches!(err, IngestError::SchemaLoadFailed { reference, .. } if reference == "teams"));
    }

    #[test]
    fn test_invalid_schema_json() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("teams.json"), "{not json").unwrap();
        let err = SchemaLoader::new(dir.path()).load("teams").unwrap_err();
        assert!(matches!(err, IngestError::SchemaLoadFailed { .. }));
    }
}
