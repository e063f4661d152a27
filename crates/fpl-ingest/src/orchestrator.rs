//! Verified table ingestion
//!
//! Every table goes through the same steps: resolve rows from the endpoint
//! cache, merge its load configuration, attach a schema if one is declared,
//! stage the rows to object storage, load them into the warehouse and verify
//! the load. Any failure in those steps becomes a `fail` result for that
//! table; bulk operations move on to the next table unless the failure policy
//! says otherwise.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::EndpointCache;
use crate::config::{AppConfig, FileType, LoadConfig};
use crate::derive::{parse_timestamp, KICKOFF_TIME_COLUMN};
use crate::error::{IngestError, Result};
use crate::fetch::FetchArgs;
use crate::merge::{apply_overrides, merge_config};
use crate::result::{IngestionReport, IngestionResult};
use crate::schema::SchemaLoader;
use crate::storage::{ObjectHandle, ObjectStorage};
use crate::table::{Row, Table};
use crate::warehouse::{LoadOptions, LoadSource, TableHandle, TableId, Warehouse, WRITE_DISPOSITION};

pub const BOOTSTRAP_STATIC: &str = "bootstrap_static";
pub const FIXTURES: &str = "fixtures";
pub const ELEMENT_SUMMARY: &str = "element_summary";

/// Valid team ids
pub const TEAM_IDS: RangeInclusive<u32> = 1..=20;

/// Default top-level directory for staged objects
pub const DEFAULT_BLOB_DIR: &str = "this_season";

/// What a bulk operation does after a table fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Record the failure and ingest the remaining tables
    #[default]
    Continue,
    /// Stop at the first failed table
    Halt,
}

impl std::str::FromStr for FailurePolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "continue" => Ok(FailurePolicy::Continue),
            "halt" | "stop" => Ok(FailurePolicy::Halt),
            other => Err(IngestError::InvalidConfig(format!(
                "unknown failure policy '{other}', expected 'continue' or 'halt'"
            ))),
        }
    }
}

/// Per-call options for [`IngestOrchestrator::ingest_table`]
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    /// Refetch the endpoint even if it is cached
    pub refresh: bool,
    pub args: FetchArgs,
    /// Applied over the effective load configuration
    pub overrides: LoadConfig,
}

impl IngestRequest {
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Replace the destination table contents
    pub fn full_refresh(mut self) -> Self {
        self.overrides
            .insert(WRITE_DISPOSITION.to_string(), Value::from("WRITE_TRUNCATE"));
        self
    }
}

/// Fixtures on one day and the teams playing in them
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureDay {
    /// `kickoff_time, team_h, team_a, team_h_name, team_a_name`
    pub fixtures: Table,
    /// Distinct team ids, ascending
    pub teams: Vec<u32>,
}

pub struct IngestOrchestrator {
    config: AppConfig,
    cache: EndpointCache,
    storage: Arc<dyn ObjectStorage>,
    warehouse: Arc<dyn Warehouse>,
    schemas: SchemaLoader,
    dataset: String,
    blob_dir: String,
    policy: FailurePolicy,
}

impl IngestOrchestrator {
    pub fn new(
        config: AppConfig,
        cache: EndpointCache,
        storage: Arc<dyn ObjectStorage>,
        warehouse: Arc<dyn Warehouse>,
        schemas: SchemaLoader,
        dataset: impl Into<String>,
    ) -> Self {
        Self {
            config,
            cache,
            storage,
            warehouse,
            schemas,
            dataset: dataset.into(),
            blob_dir: DEFAULT_BLOB_DIR.to_string(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_blob_dir(mut self, blob_dir: impl Into<String>) -> Self {
        self.blob_dir = blob_dir.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &EndpointCache {
        &self.cache
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    pub fn warehouse(&self) -> &Arc<dyn Warehouse> {
        &self.warehouse
    }

    pub fn schemas(&self) -> &SchemaLoader {
        &self.schemas
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn blob_dir(&self) -> &str {
        &self.blob_dir
    }

    pub async fn get_table(
        &mut self,
        endpoint: &str,
        table: &str,
        refresh: bool,
        args: &FetchArgs,
    ) -> Result<Table> {
        self.cache.get_table(endpoint, table, refresh, args).await
    }

    pub fn release_endpoint(&mut self, endpoint: &str) -> Result<()> {
        self.cache.release_endpoint(endpoint)
    }

    pub fn list_endpoints(&self) -> Vec<String> {
        self.config.endpoint_ids()
    }

    /// Declared tables of `endpoint`; with `ingest_only`, those included in sweeps
    pub fn list_endpoint_tables(&self, endpoint: &str, ingest_only: bool) -> Result<Vec<String>> {
        let tables: Vec<String> = self
            .config
            .endpoint(endpoint)?
            .tables
            .iter()
            .filter(|t| !ingest_only || t.included_in_sweep())
            .map(|t| t.name.clone())
            .collect();
        info!(endpoint, ?tables, ingest_only, "Configured endpoint tables");
        Ok(tables)
    }

    /// Player ids belonging to `teams`
    ///
    /// Team ids outside 1..=20 are rejected before any request is made.
    pub async fn list_elements(&mut self, teams: &[u32]) -> Result<Vec<u32>> {
        let invalid: Vec<u32> = teams
            .iter()
            .copied()
            .filter(|team| !TEAM_IDS.contains(team))
            .collect();
        if !invalid.is_empty() {
            return Err(IngestError::InvalidTeams(invalid));
        }

        let players = self
            .cache
            .get_table(BOOTSTRAP_STATIC, "elements", false, &FetchArgs::default())
            .await?;
        let elements = players
            .filter(|row| {
                row.get("team")
                    .and_then(Value::as_u64)
                    .is_some_and(|team| teams.iter().any(|t| u64::from(*t) == team))
            })
            .integer_column("id")
            .into_iter()
            .filter_map(|id| u32::try_from(id).ok())
            .collect();
        Ok(elements)
    }

    /// Fixtures kicking off on `date` (UTC) joined with home and away team names
    pub async fn get_fixtures(&mut self, date: NaiveDate) -> Result<FixtureDay> {
        info!(%date, "Getting fixtures");
        let args = FetchArgs::default();
        let fixtures = self.cache.get_table(FIXTURES, "fixtures", false, &args).await?;
        let teams = self.cache.get_table(BOOTSTRAP_STATIC, "teams", false, &args).await?;

        let names: HashMap<u64, Value> = teams
            .rows
            .iter()
            .filter_map(|row| {
                let id = row.get("id").and_then(Value::as_u64)?;
                Some((id, row.get("name").cloned().unwrap_or(Value::Null)))
            })
            .collect();
        let name_of = |row: &Row, column: &str| {
            row.get(column)
                .and_then(Value::as_u64)
                .and_then(|id| names.get(&id).cloned())
                .unwrap_or(Value::Null)
        };

        let on_date = fixtures
            .filter(|row| {
                row.get(KICKOFF_TIME_COLUMN)
                    .and_then(Value::as_str)
                    .and_then(parse_timestamp)
                    .is_some_and(|ts| ts.date_naive() == date)
            })
            .select(&[KICKOFF_TIME_COLUMN, "team_h", "team_a"]);

        let mut playing = BTreeSet::new();
        let rows = on_date
            .rows
            .into_iter()
            .map(|mut row| {
                for column in ["team_h", "team_a"] {
                    if let Some(id) = row.get(column).and_then(Value::as_u64) {
                        playing.extend(u32::try_from(id).ok());
                    }
                }
                let home = name_of(&row, "team_h");
                let away = name_of(&row, "team_a");
                row.insert("team_h_name".to_string(), home);
                row.insert("team_a_name".to_string(), away);
                row
            })
            .collect();

        Ok(FixtureDay {
            fixtures: Table::new(FIXTURES, rows),
            teams: playing.into_iter().collect(),
        })
    }

    /// Ingest one table and report the outcome; never returns an error
    pub async fn ingest_table(&mut self, endpoint: &str, table: &str, request: &IngestRequest) -> IngestionResult {
        info!(endpoint, table, "Ingesting table");
        match self.try_ingest_table(endpoint, table, request).await {
            Ok(loaded) => {
                info!(endpoint, table, destination = %loaded.id, rows = loaded.rows_loaded, "Table ingested");
                IngestionResult::success(endpoint, table, loaded.rows_loaded)
            },
            Err(e) => {
                error!(endpoint, table, error = %e, "Table failed to ingest");
                IngestionResult::fail(endpoint, table, e)
            },
        }
    }

    async fn try_ingest_table(&mut self, endpoint: &str, table: &str, request: &IngestRequest) -> Result<TableHandle> {
        // Resolve
        let rows = self
            .cache
            .get_table(endpoint, table, request.refresh, &request.args)
            .await?;

        // Configure
        let endpoint_config = self.config.endpoint(endpoint)?;
        let table_config = endpoint_config.table(table)?;
        let effective = merge_config(&table_config.config, &endpoint_config.config);
        let effective = apply_overrides(&effective, &request.overrides);
        let file_type = table_config.file_type.unwrap_or(endpoint_config.file_type);
        let options = LoadOptions::from_config(&effective, file_type)?;

        // Schema
        let schema = match table_config.schema_reference() {
            Some(reference) => Some(self.schemas.load(&reference)?),
            None => {
                info!(table, "No schema specified in config, autodetecting");
                None
            },
        };
        let options = options.with_schema(schema);

        // Stage
        let started_at = Utc::now();
        let key = staging_key(&self.blob_dir, table, started_at.timestamp(), options.file_type);
        let staged = self.storage.write(&rows, &key, options.file_type).await?;
        info!(table, uri = %staged.uri, rows = rows.len(), "Staged table");

        // Load
        let destination = TableId::new(&self.dataset, table);
        let loaded = self
            .warehouse
            .load(&LoadSource::Object(staged.clone()), &destination, &options)
            .await?;

        // Verify
        self.verify(&staged, &loaded, started_at).await?;
        Ok(loaded)
    }

    /// The staged object and the table must exist, and the table must have
    /// been modified strictly after `started_at`
    async fn verify(&self, staged: &ObjectHandle, loaded: &TableHandle, started_at: DateTime<Utc>) -> Result<()> {
        let table_id = loaded.id.to_string();

        if !self.storage.exists(staged).await? {
            return Err(IngestError::verification_failed(
                &table_id,
                format!("staged object {} does not exist", staged.uri),
            ));
        }
        if !self.warehouse.table_exists(loaded).await? {
            return Err(IngestError::verification_failed(&table_id, "table does not exist"));
        }

        match self.warehouse.last_modified(loaded).await? {
            Some(modified) if modified > started_at => Ok(()),
            Some(modified) => Err(IngestError::verification_failed(
                &table_id,
                format!("table was not updated (last modified {modified}, load started {started_at})"),
            )),
            None => Err(IngestError::verification_failed(&table_id, "table has no last-modified time")),
        }
    }

    /// Ingest the sweep tables of `endpoint`, optionally narrowed to `subset`
    pub async fn ingest_all_tables_for_endpoint(
        &mut self,
        endpoint: &str,
        subset: Option<&[String]>,
        release: bool,
    ) -> Result<IngestionReport> {
        let mut tables = self.list_endpoint_tables(endpoint, true)?;
        if let Some(subset) = subset {
            for name in subset.iter().filter(|name| !tables.contains(name)) {
                warn!(endpoint, table = %name, "Requested table is not configured for ingestion");
            }
            tables.retain(|t| subset.contains(t));
        }

        let requests = tables.into_iter().map(|t| (t, IngestRequest::default()));
        Ok(self.ingest_tables(endpoint, requests, release).await)
    }

    /// Ingest player history for every player of `teams`
    pub async fn ingest_player_history_for_teams(
        &mut self,
        teams: &[u32],
        release: bool,
        full_refresh: bool,
    ) -> Result<IngestionReport> {
        let tables = self.list_endpoint_tables(ELEMENT_SUMMARY, true)?;
        let elements = self.list_elements(teams).await?;
        info!(?teams, players = elements.len(), "Ingesting player history");

        let mut request = IngestRequest {
            args: FetchArgs::for_elements(elements).with_tables(tables.clone()),
            ..Default::default()
        };
        if full_refresh {
            request = request.full_refresh();
        }

        // The first table fetches for these elements; the rest reuse that payload
        let requests = tables
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t, request.clone().refresh(i == 0)));
        Ok(self.ingest_tables(ELEMENT_SUMMARY, requests, release).await)
    }

    async fn ingest_tables(
        &mut self,
        endpoint: &str,
        requests: impl Iterator<Item = (String, IngestRequest)>,
        release: bool,
    ) -> IngestionReport {
        let mut report = IngestionReport::new();
        for (table, request) in requests {
            let result = self.ingest_table(endpoint, &table, &request).await;
            let failed = !result.is_success();
            report.insert(table.clone(), result);

            if failed && self.policy == FailurePolicy::Halt {
                warn!(endpoint, table = %table, "Halting endpoint ingestion after failure");
                break;
            }
        }

        if release && self.cache.is_cached(endpoint) {
            if let Err(e) = self.cache.release_endpoint(endpoint) {
                warn!(endpoint, error = %e, "Failed to release endpoint");
            }
        }
        report
    }
}

/// `<blob_dir>/<table>/<unix_seconds>_<table>.<ext>`
pub fn staging_key(blob_dir: &str, table: &str, unix_seconds: i64, file_type: FileType) -> String {
    format!(
        "{}/{table}/{unix_seconds}_{table}.{}",
        blob_dir.trim_end_matches('/'),
        file_type.extension()
    )
}
