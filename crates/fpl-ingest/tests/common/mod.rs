//! Shared fakes for fpl-ingest integration tests
//!
//! - [`ScriptedFetcher`]: returns a fixed payload (or error) and counts calls
//! - [`MemoryStorage`]: object storage in a map; keys can be hidden from `exists`
//! - [`MemoryWarehouse`]: decodes staged objects and tracks last-modified times;
//!   a table's timestamp can be pinned or the table reported missing
//! - [`Harness`]: an orchestrator wired to all three

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fpl_ingest::cache::EndpointCache;
use fpl_ingest::codec::decode_rows;
use fpl_ingest::config::AppConfig;
use fpl_ingest::derive::{TableDeriver, TransformRegistry};
use fpl_ingest::fetch::{EndpointFetcher, FetchArgs, FetcherRegistry};
use fpl_ingest::schema::SchemaLoader;
use fpl_ingest::storage::{ObjectHandle, ObjectStorage};
use fpl_ingest::warehouse::{LoadOptions, LoadSource, TableHandle, TableId, Warehouse, WriteDisposition};
use fpl_ingest::{FailurePolicy, IngestError, IngestOrchestrator, Payload, Result, Row};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const DATASET: &str = "fpl_test";
pub const BUCKET: &str = "fpl-test-data";

pub const CONFIG: &str = r#"
api:
  base: http://localhost/api
  endpoints:
    bootstrap_static:
      name: bootstrap-static
      description: Season overview
      file_type: json
      config:
        write_disposition: WRITE_TRUNCATE
      tables:
        events:
          config:
            write_disposition: WRITE_APPEND
        teams:
          use_schema: true
        elements: {}
        element_types:
          ingest: false
    fixtures:
      name: fixtures
      description: Fixtures
      shape: collection
      file_type: json
      config:
        write_disposition: WRITE_TRUNCATE
      tables:
        fixtures: {}
    element_summary:
      name: element-summary
      description: Player history
      shape: per_element
      file_type: csv
      config:
        write_disposition: WRITE_APPEND
      tables:
        history: {}
        history_past:
          ingest: false
"#;

const TEAMS_SCHEMA: &str = r#"[
    {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
    {"name": "name", "type": "STRING", "mode": "REQUIRED"}
]"#;

const HISTORY_SCHEMA: &str = r#"[
    {"name": "element", "type": "INTEGER", "mode": "REQUIRED"},
    {"name": "total_points", "type": "INTEGER"}
]"#;

pub fn team_name(id: u32) -> String {
    format!("Team {id}")
}

/// 20 teams, two players per team (player ids `2t - 1` and `2t`), three gameweeks
pub fn bootstrap_document() -> Value {
    let teams: Vec<Value> = (1..=20u32)
        .map(|id| json!({"id": id, "name": team_name(id), "short_name": format!("T{id:02}")}))
        .collect();
    let elements: Vec<Value> = (1..=20u32)
        .flat_map(|team| {
            [2 * team - 1, 2 * team]
                .map(|id| json!({"id": id, "team": team, "web_name": format!("Player {id}")}))
        })
        .collect();
    json!({
        "events": [{"id": 1, "finished": true}, {"id": 2, "finished": true}, {"id": 3, "finished": false}],
        "teams": teams,
        "elements": elements,
        "element_types": [{"id": 1, "singular_name": "Goalkeeper"}],
        "total_players": 11000000
    })
}

/// Two fixtures on 2024-03-02, one on 2024-03-03 and one unscheduled
pub fn fixtures_collection() -> Value {
    json!([
        {"id": 1, "kickoff_time": "2024-03-02T12:30:00Z", "team_h": 1, "team_a": 2, "event": 27},
        {"id": 2, "kickoff_time": "2024-03-02T15:00:00Z", "team_h": 3, "team_a": 4, "event": 27},
        {"id": 3, "kickoff_time": "2024-03-03T14:00:00Z", "team_h": 5, "team_a": 6, "event": 27},
        {"id": 4, "kickoff_time": null, "team_h": 7, "team_a": 8, "event": null}
    ])
}

/// Element summary payload as accumulated for `elements`
pub fn element_summary_payload(elements: &[u32]) -> Payload {
    let history: Vec<Value> = elements
        .iter()
        .map(|e| json!({"element": e, "fixture": 1, "total_points": e % 7, "element_id": e}))
        .collect();
    let history_past: Vec<Value> = elements
        .iter()
        .map(|e| json!({"season_name": "2022/23", "total_points": 100, "element_id": e}))
        .collect();
    let mut payload = Payload::new();
    payload.insert("history", Value::Array(history));
    payload.insert("history_past", Value::Array(history_past));
    payload
}

enum Script {
    Document(Value),
    Collection(String, Value),
    ElementSummary,
    Fail(String),
}

/// Deterministic fetcher that records every call
pub struct ScriptedFetcher {
    script: Script,
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<FetchArgs>>>,
}

impl ScriptedFetcher {
    fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn document(document: Value) -> Self {
        Self::new(Script::Document(document))
    }

    pub fn collection(endpoint: &str, items: Value) -> Self {
        Self::new(Script::Collection(endpoint.to_string(), items))
    }

    pub fn element_summary() -> Self {
        Self::new(Script::ElementSummary)
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(Script::Fail(reason.to_string()))
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn seen(&self) -> Arc<Mutex<Vec<FetchArgs>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl EndpointFetcher for ScriptedFetcher {
    async fn fetch(&self, args: &FetchArgs) -> Result<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(args.clone());
        match &self.script {
            Script::Document(document) => Payload::from_document("scripted", document.clone()),
            Script::Collection(endpoint, items) => {
                let mut payload = Payload::new();
                payload.insert(endpoint.clone(), items.clone());
                Ok(payload)
            },
            Script::ElementSummary => Ok(element_summary_payload(&args.elements)),
            Script::Fail(reason) => Err(IngestError::fetch_failed("scripted", reason)),
        }
    }
}

/// Object storage held in memory
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Writes succeed but nothing is kept
    pub discard_writes: bool,
    /// Key prefixes `exists` reports as absent; reads still succeed
    hidden: Mutex<Vec<String>>,
}

impl MemoryStorage {
    pub fn hide_prefix(&self, prefix: &str) {
        self.hidden.lock().unwrap().push(prefix.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    fn handle(&self, key: &str) -> ObjectHandle {
        ObjectHandle {
            key: key.to_string(),
            uri: format!("mem://{BUCKET}/{key}"),
        }
    }

    async fn write_bytes(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<ObjectHandle> {
        if !self.discard_writes {
            self.objects.lock().unwrap().insert(key.to_string(), data);
        }
        Ok(self.handle(key))
    }

    async fn read(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
        self.get(&handle.key)
            .ok_or_else(|| IngestError::storage(format!("no object {}", handle.key)))
    }

    async fn exists(&self, handle: &ObjectHandle) -> Result<bool> {
        if self.hidden.lock().unwrap().iter().any(|p| handle.key.starts_with(p)) {
            return Ok(false);
        }
        Ok(self.objects.lock().unwrap().contains_key(&handle.key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectHandle>> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .map(|k| self.handle(&k))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub rows: Vec<Row>,
    pub last_modified: DateTime<Utc>,
    pub options: LoadOptions,
}

/// Warehouse that keeps loaded rows in memory
pub struct MemoryWarehouse {
    storage: Arc<dyn ObjectStorage>,
    tables: Mutex<HashMap<TableId, LoadedTable>>,
    pinned: Mutex<HashMap<String, DateTime<Utc>>>,
    missing: Mutex<HashSet<String>>,
    pub loads: AtomicUsize,
}

impl MemoryWarehouse {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            storage,
            tables: Mutex::new(HashMap::new()),
            pinned: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Loads into `table` keep a last-modified time far in the past
    pub fn keep_stale(&self, table: &str) {
        self.pin_last_modified(table, DateTime::<Utc>::from_timestamp(0, 0).unwrap());
    }

    /// Loads into `table` report `at` as their last-modified time
    pub fn pin_last_modified(&self, table: &str, at: DateTime<Utc>) {
        self.pinned.lock().unwrap().insert(table.to_string(), at);
    }

    /// `table_exists` reports `table` as absent even after a load
    pub fn report_missing(&self, table: &str) {
        self.missing.lock().unwrap().insert(table.to_string());
    }

    pub fn table(&self, table: &str) -> Option<LoadedTable> {
        self.tables
            .lock()
            .unwrap()
            .get(&TableId::new(DATASET, table))
            .cloned()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn load(&self, source: &LoadSource, destination: &TableId, options: &LoadOptions) -> Result<TableHandle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let objects = match source {
            LoadSource::Object(handle) => vec![handle.clone()],
            LoadSource::Prefix(prefix) => self.storage.list(prefix).await?,
        };
        let mut rows = Vec::new();
        for object in &objects {
            let bytes = self.storage.read(object).await?;
            rows.extend(decode_rows(&bytes, options.file_type)?);
        }

        let pinned = self.pinned.lock().unwrap().get(&destination.table).copied();
        let last_modified = pinned.unwrap_or_else(|| Utc::now() + Duration::milliseconds(1));

        let loaded = rows.len() as u64;
        let mut tables = self.tables.lock().unwrap();
        let entry = tables.entry(destination.clone()).or_insert_with(|| LoadedTable {
            rows: Vec::new(),
            last_modified,
            options: options.clone(),
        });
        match options.write_disposition {
            WriteDisposition::WriteTruncate => entry.rows = rows,
            WriteDisposition::WriteAppend => entry.rows.extend(rows),
            WriteDisposition::WriteEmpty if entry.rows.is_empty() => entry.rows = rows,
            WriteDisposition::WriteEmpty => {
                return Err(IngestError::warehouse(format!("{destination} is not empty")))
            },
        }
        entry.last_modified = last_modified;
        entry.options = options.clone();

        Ok(TableHandle {
            id: destination.clone(),
            rows_loaded: loaded,
        })
    }

    async fn table_exists(&self, table: &TableHandle) -> Result<bool> {
        if self.missing.lock().unwrap().contains(&table.id.table) {
            return Ok(false);
        }
        Ok(self.tables.lock().unwrap().contains_key(&table.id))
    }

    async fn last_modified(&self, table: &TableHandle) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&table.id)
            .map(|t| t.last_modified))
    }
}

/// Orchestrator wired to scripted fetchers and in-memory collaborators
pub struct Harness {
    pub orchestrator: IngestOrchestrator,
    pub storage: Arc<MemoryStorage>,
    pub warehouse: Arc<MemoryWarehouse>,
    pub calls: HashMap<String, Arc<AtomicUsize>>,
    pub seen: HashMap<String, Arc<Mutex<Vec<FetchArgs>>>>,
    _schemas: TempDir,
}

pub struct HarnessBuilder {
    fetchers: Vec<(String, ScriptedFetcher)>,
    storage: MemoryStorage,
    schemas: Vec<(&'static str, &'static str)>,
    policy: FailurePolicy,
    config: String,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            fetchers: vec![
                ("bootstrap_static".to_string(), ScriptedFetcher::document(bootstrap_document())),
                (
                    "fixtures".to_string(),
                    ScriptedFetcher::collection("fixtures", fixtures_collection()),
                ),
                ("element_summary".to_string(), ScriptedFetcher::element_summary()),
            ],
            storage: MemoryStorage::default(),
            schemas: vec![("teams", TEAMS_SCHEMA), ("history", HISTORY_SCHEMA)],
            policy: FailurePolicy::Continue,
            config: CONFIG.to_string(),
        }
    }
}

impl HarnessBuilder {
    pub fn fetcher(mut self, endpoint: &str, fetcher: ScriptedFetcher) -> Self {
        self.fetchers.retain(|(id, _)| id != endpoint);
        self.fetchers.push((endpoint.to_string(), fetcher));
        self
    }

    pub fn discard_writes(mut self) -> Self {
        self.storage.discard_writes = true;
        self
    }

    pub fn without_schema(mut self, reference: &str) -> Self {
        self.schemas.retain(|(name, _)| *name != reference);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(mut self, yaml: impl Into<String>) -> Self {
        self.config = yaml.into();
        self
    }

    pub fn build(self) -> Harness {
        let config = AppConfig::from_yaml_str(&self.config).unwrap();

        let mut registry = FetcherRegistry::new();
        let mut calls = HashMap::new();
        let mut seen = HashMap::new();
        for (endpoint, fetcher) in self.fetchers {
            calls.insert(endpoint.clone(), fetcher.calls());
            seen.insert(endpoint.clone(), fetcher.seen());
            registry.register(endpoint, Arc::new(fetcher));
        }
        let deriver = TableDeriver::from_config(&config, TransformRegistry::default()).unwrap();
        let cache = EndpointCache::new(registry, deriver);

        let schemas = TempDir::new().unwrap();
        for (name, body) in &self.schemas {
            std::fs::write(schemas.path().join(format!("{name}.json")), body).unwrap();
        }

        let storage = Arc::new(self.storage);
        let warehouse = Arc::new(MemoryWarehouse::new(storage.clone()));
        let orchestrator = IngestOrchestrator::new(
            config,
            cache,
            storage.clone(),
            warehouse.clone(),
            SchemaLoader::new(schemas.path()),
            DATASET,
        )
        .with_failure_policy(self.policy);

        Harness {
            orchestrator,
            storage,
            warehouse,
            calls,
            seen,
            _schemas: schemas,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn fetches(&self, endpoint: &str) -> usize {
        self.calls[endpoint].load(Ordering::SeqCst)
    }

    pub fn fetch_args(&self, endpoint: &str) -> Vec<FetchArgs> {
        self.seen[endpoint].lock().unwrap().clone()
    }
}
