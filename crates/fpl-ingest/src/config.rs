//! Endpoint and table declarations
//!
//! The YAML document is first read as an untyped tree so that every endpoint
//! can be checked for its required keys (`name`, `config`, `tables`) and
//! rejected with [`IngestError::ConfigMissingKeys`] before the run touches
//! the network. Only then is it converted into the typed structures below.
//! Declaration order of endpoints and tables is preserved.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

/// Default location of the endpoint declarations
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yml";

const REQUIRED_ENDPOINT_KEYS: [&str; 3] = ["name", "config", "tables"];
const DESIRED_ENDPOINT_KEYS: [&str; 1] = ["description"];

/// Key-value load configuration (write disposition, source format, ...)
pub type LoadConfig = BTreeMap<String, serde_json::Value>;

/// Staging file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    /// Newline-delimited JSON
    #[default]
    #[serde(alias = "ndjson", alias = "jsonl")]
    Json,
}

impl FileType {
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Json => "json",
        }
    }

    /// Warehouse-facing source format name
    pub fn source_format(self) -> &'static str {
        match self {
            FileType::Csv => "CSV",
            FileType::Json => "NEWLINE_DELIMITED_JSON",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            FileType::Csv => "text/csv",
            FileType::Json => "application/x-ndjson",
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "json" | "ndjson" | "jsonl" | "newline_delimited_json" => Ok(FileType::Json),
            other => Err(IngestError::InvalidConfig(format!("unknown file type '{other}'"))),
        }
    }
}

/// How an endpoint's response is turned into a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndpointShape {
    /// Response is an object whose keys are the sub-collections
    #[default]
    Document,
    /// Response is a bare array, stored under the endpoint id
    Collection,
    /// One request per element id; sub-collections are concatenated
    PerElement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppConfig {
    pub api: ApiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiConfig {
    pub base: String,
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointConfig {
    /// Key the endpoint is declared under, e.g. `bootstrap_static`
    pub id: String,
    /// Remote path segment, e.g. `bootstrap-static`
    pub name: String,
    pub description: Option<String>,
    pub shape: EndpointShape,
    pub file_type: FileType,
    /// Default load configuration for every table of the endpoint
    pub config: LoadConfig,
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    #[serde(skip_deserializing)]
    pub name: String,
    /// Include in bulk sweeps; absent means always
    #[serde(default)]
    pub ingest: Option<bool>,
    #[serde(default)]
    pub transform: Option<String>,
    /// Explicit schema reference
    #[serde(default)]
    pub schema: Option<String>,
    /// Use the schema named after the table
    #[serde(default)]
    pub use_schema: bool,
    #[serde(default)]
    pub file_type: Option<FileType>,
    #[serde(default, alias = "bigquery_config")]
    pub config: LoadConfig,
}

/// Endpoint fields after the required-key check
#[derive(Deserialize)]
struct EndpointDecl {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    shape: EndpointShape,
    #[serde(default)]
    file_type: FileType,
    #[serde(alias = "bigquery_config")]
    config: LoadConfig,
    tables: Mapping,
}

impl AppConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading endpoint configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let document: YamlValue = serde_yaml::from_str(text)?;
        Self::from_yaml_value(document)
    }

    fn from_yaml_value(document: YamlValue) -> Result<Self> {
        let api = document
            .get("api")
            .ok_or_else(|| IngestError::InvalidConfig("missing 'api' section".to_string()))?;
        let base = api
            .get("base")
            .and_then(YamlValue::as_str)
            .ok_or_else(|| IngestError::InvalidConfig("missing 'api.base'".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let declared = api
            .get("endpoints")
            .and_then(YamlValue::as_mapping)
            .ok_or_else(|| IngestError::InvalidConfig("missing 'api.endpoints'".to_string()))?;

        // Validate every endpoint before converting any of them
        for (key, value) in declared {
            validate_endpoint(&yaml_key(key)?, value)?;
        }

        let mut endpoints = Vec::with_capacity(declared.len());
        for (key, value) in declared {
            endpoints.push(EndpointConfig::from_yaml(yaml_key(key)?, value.clone())?);
        }

        Ok(Self {
            api: ApiConfig { base, endpoints },
        })
    }

    pub fn endpoint(&self, id: &str) -> Result<&EndpointConfig> {
        self.api
            .endpoints
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| IngestError::UnknownEndpoint(id.to_string()))
    }

    pub fn endpoint_ids(&self) -> Vec<String> {
        self.api.endpoints.iter().map(|e| e.id.clone()).collect()
    }
}

impl EndpointConfig {
    fn from_yaml(id: String, value: YamlValue) -> Result<Self> {
        let decl: EndpointDecl = serde_yaml::from_value(value)?;

        let mut tables = Vec::with_capacity(decl.tables.len());
        for (key, value) in decl.tables {
            let name = yaml_key(&key)?;
            // `table: ~` and `table: {}` both declare a table with no overrides
            let mut table: TableConfig = if value.is_null() {
                TableConfig::default()
            } else {
                serde_yaml::from_value(value)?
            };
            table.name = name;
            tables.push(table);
        }

        Ok(Self {
            id,
            name: decl.name,
            description: decl.description,
            shape: decl.shape,
            file_type: decl.file_type,
            config: decl.config,
            tables,
        })
    }

    pub fn table(&self, name: &str) -> Result<&TableConfig> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| IngestError::unknown_table(&self.id, name))
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// `<base>/<name>`
    pub fn url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.name)
    }

    /// `<base>/<name>/<element>`
    pub fn element_url(&self, base: &str, element: u32) -> String {
        format!("{}/{}", self.url(base), element)
    }
}

impl TableConfig {
    pub fn included_in_sweep(&self) -> bool {
        self.ingest.unwrap_or(true)
    }

    pub fn schema_reference(&self) -> Option<String> {
        self.schema
            .clone()
            .or_else(|| self.use_schema.then(|| self.name.clone()))
    }
}

/// Check one endpoint declaration for required and desired keys
pub fn validate_endpoint(id: &str, value: &YamlValue) -> Result<()> {
    debug!(endpoint = id, "Validating endpoint configuration");
    // An explicit `~` counts as missing
    let present = |key: &str| value.get(key).is_some_and(|v| !v.is_null());

    let missing: Vec<String> = REQUIRED_ENDPOINT_KEYS
        .into_iter()
        .filter(|k| !present(*k))
        .map(|k| k.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::ConfigMissingKeys {
            endpoint: id.to_string(),
            missing,
        });
    }

    let absent: Vec<&str> = DESIRED_ENDPOINT_KEYS
        .into_iter()
        .filter(|k| !present(*k))
        .collect();
    if !absent.is_empty() {
        warn!(endpoint = id, missing = ?absent, "Endpoint configuration missing desired values");
    }

    Ok(())
}

fn yaml_key(key: &YamlValue) -> Result<String> {
    match key {
        YamlValue::String(s) => Ok(s.clone()),
        other => Err(IngestError::InvalidConfig(format!(
            "configuration keys must be strings, got {other:?}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const CONFIG: &str = r#"
api:
  base: https://fantasy.premierleague.com/api/
  endpoints:
    bootstrap_static:
      name: bootstrap-static
      description: Season overview
      file_type: json
      config:
        write_disposition: WRITE_TRUNCATE
      tables:
        events: {}
        teams:
          use_schema: true
        elements:
          ingest: false
          file_type: csv
          bigquery_config:
            write_disposition: WRITE_APPEND
    fixtures:
      name: fixtures
      shape: collection
      config: {}
      tables:
        fixtures: ~
"#;

    #[test]
    fn test_parses_endpoints_in_declaration_order() {
        let config = AppConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(config.endpoint_ids(), vec!["bootstrap_static", "fixtures"]);
        assert_eq!(config.api.base, "https://fantasy.premierleague.com/api");

        let bootstrap = config.endpoint("bootstrap_static").unwrap();
        assert_eq!(bootstrap.table_names(), vec!["events", "teams", "elements"]);
        assert_eq!(bootstrap.url(&config.api.base), "https://fantasy.premierleague.com/api/bootstrap-static");
    }

    #[test]
    fn test_table_fields() {
        let config = AppConfig::from_yaml_str(CONFIG).unwrap();
        let bootstrap = config.endpoint("bootstrap_static").unwrap();

        let elements = bootstrap.table("elements").unwrap();
        assert!(!elements.included_in_sweep());
        assert_eq!(elements.file_type, Some(FileType::Csv));
        assert_eq!(elements.config["write_disposition"], json!("WRITE_APPEND"));

        let teams = bootstrap.table("teams").unwrap();
        assert!(teams.included_in_sweep());
        assert_eq!(teams.schema_reference(), Some("teams".to_string()));

        let fixtures = config.endpoint("fixtures").unwrap();
        assert_eq!(fixtures.shape, EndpointShape::Collection);
        assert_eq!(fixtures.table("fixtures").unwrap().schema_reference(), None);
    }

    #[test]
    fn test_missing_required_keys_rejected() {
        let text = r#"
api:
  base: http://localhost
  endpoints:
    fixtures:
      name: fixtures
      description: no tables or config
"#;
        let err = AppConfig::from_yaml_str(text).unwrap_err();
        match err {
            IngestError::ConfigMissingKeys { endpoint, missing } => {
                assert_eq!(endpoint, "fixtures");
                assert_eq!(missing, vec!["config", "tables"]);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_null_required_keys_rejected() {
        let text = r#"
api:
  base: http://localhost
  endpoints:
    fixtures:
      name: fixtures
      config: ~
      tables:
"#;
        let err = AppConfig::from_yaml_str(text).unwrap_err();
        match err {
            IngestError::ConfigMissingKeys { endpoint, missing } => {
                assert_eq!(endpoint, "fixtures");
                assert_eq!(missing, vec!["config", "tables"]);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_table_key_rejected() {
        let text = r#"
api:
  base: http://localhost
  endpoints:
    fixtures:
      name: fixtures
      config: {}
      tables:
        fixtures:
          injest: true
"#;
        assert!(matches!(AppConfig::from_yaml_str(text), Err(IngestError::Yaml(_))));
    }

    #[test]
    fn test_unknown_endpoint_and_table() {
        let config = AppConfig::from_yaml_str(CONFIG).unwrap();
        assert!(matches!(config.endpoint("live"), Err(IngestError::UnknownEndpoint(_))));
        let fixtures = config.endpoint("fixtures").unwrap();
        assert!(matches!(fixtures.table("teams"), Err(IngestError::UnknownTable { .. })));
    }

    #[test]
    fn test_file_type_from_str() {
        assert_eq!("CSV".parse::<FileType>().unwrap(), FileType::Csv);
        assert_eq!("ndjson".parse::<FileType>().unwrap(), FileType::Json);
        assert!("parquet".parse::<FileType>().is_err());
        assert_eq!(FileType::Json.extension(), "json");
    }
}
