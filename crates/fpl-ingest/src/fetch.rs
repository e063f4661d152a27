//! Endpoint fetchers
//!
//! A fetcher turns one endpoint declaration into a [`Payload`]. Fetchers are
//! registered per endpoint id in a [`FetcherRegistry`] built once at startup
//! and owned by the endpoint cache.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::{AppConfig, EndpointConfig, EndpointShape};
use crate::error::{IngestError, Result};
use crate::table::{json_type, Payload};

/// Default HTTP timeout for API requests in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

const USER_AGENT: &str = concat!("fpl-ingest/", env!("CARGO_PKG_VERSION"));

/// Column stamped onto rows accumulated by per-element endpoints
pub const ELEMENT_ID_COLUMN: &str = "element_id";

/// Arguments for a single fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchArgs {
    /// Element ids for per-element endpoints
    pub elements: Vec<u32>,
    /// Sub-collections to accumulate; defaults to the endpoint's declared tables
    pub tables: Option<Vec<String>>,
}

impl FetchArgs {
    pub fn for_elements(elements: Vec<u32>) -> Self {
        Self {
            elements,
            tables: None,
        }
    }

    pub fn with_tables(mut self, tables: Vec<String>) -> Self {
        self.tables = Some(tables);
        self
    }
}

#[async_trait]
pub trait EndpointFetcher: Send + Sync {
    async fn fetch(&self, args: &FetchArgs) -> Result<Payload>;
}

/// Fetches an endpoint from the remote HTTP API
pub struct HttpFetcher {
    client: Client,
    base: String,
    endpoint: EndpointConfig,
}

impl HttpFetcher {
    pub fn new(client: Client, base: impl Into<String>, endpoint: EndpointConfig) -> Self {
        Self {
            client,
            base: base.into(),
            endpoint,
        }
    }

    /// Shared reqwest client for every fetcher of a run
    pub fn build_client(timeout: Duration) -> Result<Client> {
        Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| IngestError::InvalidConfig(format!("failed to build HTTP client: {e}")))
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        let id = &self.endpoint.id;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::fetch_failed(id, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(endpoint = %id, url, status = status.as_u16(), body = %body, "API call failed");
            return Err(IngestError::fetch_failed(id, format!("HTTP {status} from {url}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| IngestError::fetch_failed(id, e))
    }

    async fn fetch_document(&self) -> Result<Payload> {
        let url = self.endpoint.url(&self.base);
        info!(endpoint = %self.endpoint.id, url = %url, "Downloading endpoint");
        let document = self.get_json(&url).await?;
        Payload::from_document(&self.endpoint.id, document)
    }

    async fn fetch_collection(&self) -> Result<Payload> {
        let url = self.endpoint.url(&self.base);
        info!(endpoint = %self.endpoint.id, url = %url, "Downloading endpoint");
        let collection = self.get_json(&url).await?;
        if !collection.is_array() {
            return Err(IngestError::fetch_failed(
                &self.endpoint.id,
                format!("expected a JSON array, got {}", json_type(&collection)),
            ));
        }

        let mut payload = Payload::new();
        payload.insert(self.endpoint.id.clone(), collection);
        Ok(payload)
    }

    async fn fetch_per_element(&self, args: &FetchArgs) -> Result<Payload> {
        let id = &self.endpoint.id;
        let wanted = args
            .tables
            .clone()
            .unwrap_or_else(|| self.endpoint.table_names());
        let mut accumulated: Vec<(String, Vec<Value>)> =
            wanted.into_iter().map(|name| (name, Vec::new())).collect();

        let total = args.elements.len();
        for (i, element) in args.elements.iter().copied().enumerate() {
            let url = self.endpoint.element_url(&self.base, element);
            info!(endpoint = %id, "[{}/{}] Downloading endpoint {}", i + 1, total, url);

            let document = self.get_json(&url).await?;
            let Value::Object(mut collections) = document else {
                return Err(IngestError::fetch_failed(
                    id,
                    format!("element {element}: expected a JSON object"),
                ));
            };

            let missing: Vec<&str> = accumulated
                .iter()
                .map(|(name, _)| name.as_str())
                .filter(|name| !collections.contains_key(*name))
                .collect();
            if !missing.is_empty() {
                return Err(IngestError::fetch_failed(
                    id,
                    format!("element {element}: the following keys are missing {missing:?}"),
                ));
            }

            for (name, rows) in accumulated.iter_mut() {
                let Some(Value::Array(items)) = collections.remove(name.as_str()) else {
                    return Err(IngestError::fetch_failed(
                        id,
                        format!("element {element}: '{name}' is not an array"),
                    ));
                };
                rows.extend(items.into_iter().map(|mut item| {
                    if let Value::Object(row) = &mut item {
                        row.insert(ELEMENT_ID_COLUMN.to_string(), Value::from(element));
                    }
                    item
                }));
            }
        }

        let mut payload = Payload::new();
        for (name, rows) in accumulated {
            debug!(endpoint = %id, collection = %name, rows = rows.len(), "Accumulated collection");
            payload.insert(name, Value::Array(rows));
        }
        Ok(payload)
    }
}

#[async_trait]
impl EndpointFetcher for HttpFetcher {
    async fn fetch(&self, args: &FetchArgs) -> Result<Payload> {
        match self.endpoint.shape {
            EndpointShape::Document => self.fetch_document().await,
            EndpointShape::Collection => self.fetch_collection().await,
            EndpointShape::PerElement => self.fetch_per_element(args).await,
        }
    }
}

/// Endpoint id to fetcher capability
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<String, Arc<dyn EndpointFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`HttpFetcher`] per declared endpoint, sharing `client`
    pub fn from_config(config: &AppConfig, client: Client) -> Self {
        let mut registry = Self::new();
        for endpoint in &config.api.endpoints {
            let fetcher = HttpFetcher::new(client.clone(), config.api.base.clone(), endpoint.clone());
            registry.register(endpoint.id.clone(), Arc::new(fetcher));
        }
        registry
    }

    pub fn register(&mut self, endpoint: impl Into<String>, fetcher: Arc<dyn EndpointFetcher>) {
        self.fetchers.insert(endpoint.into(), fetcher);
    }

    pub fn get(&self, endpoint: &str) -> Result<Arc<dyn EndpointFetcher>> {
        self.fetchers
            .get(endpoint)
            .cloned()
            .ok_or_else(|| IngestError::UnknownEndpoint(endpoint.to_string()))
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.fetchers.contains_key(endpoint)
    }
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.fetchers.keys().collect();
        ids.sort();
        f.debug_struct("FetcherRegistry").field("endpoints", &ids).finish()
    }
}
