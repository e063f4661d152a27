//! FPL Ingest
//!
//! Batch ingestion of the fantasy.premierleague API into object storage and
//! a warehouse.
//!
//! - **Fetch**: one fetcher per configured endpoint ([`fetch`])
//! - **Cache**: one payload per endpoint, shared by every table derived from it ([`cache`])
//! - **Derive**: tables are sub-collections of a payload plus an optional transform ([`derive`])
//! - **Ingest**: stage, load and verify each table ([`orchestrator`])
//! - **Jobs**: the scheduled pipelines built on top ([`jobs`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fpl_ingest::cache::EndpointCache;
//! use fpl_ingest::config::AppConfig;
//! use fpl_ingest::derive::{TableDeriver, TransformRegistry};
//! use fpl_ingest::fetch::{FetcherRegistry, HttpFetcher, DEFAULT_HTTP_TIMEOUT_SECS};
//! use fpl_ingest::orchestrator::{IngestOrchestrator, IngestRequest};
//! use fpl_ingest::schema::SchemaLoader;
//! use fpl_ingest::storage::{LocalStorage, ObjectStorage};
//! use fpl_ingest::warehouse::{PostgresWarehouse, postgres::PostgresConfig};
//!
//! # async fn run() -> fpl_ingest::Result<()> {
//! let config = AppConfig::from_path("config/config.yml")?;
//! let client = HttpFetcher::build_client(std::time::Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))?;
//! let cache = EndpointCache::new(
//!     FetcherRegistry::from_config(&config, client),
//!     TableDeriver::from_config(&config, TransformRegistry::default())?,
//! );
//! let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new("data", "fpl-data"));
//! let warehouse = PostgresWarehouse::connect(&PostgresConfig::from_env()?, storage.clone()).await?;
//!
//! let mut orchestrator = IngestOrchestrator::new(
//!     config,
//!     cache,
//!     storage,
//!     Arc::new(warehouse),
//!     SchemaLoader::new("config/schemas"),
//!     "fantasy_premier_league",
//! );
//! let result = orchestrator
//!     .ingest_table("bootstrap_static", "teams", &IngestRequest::default())
//!     .await;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cache;
pub mod codec;
pub mod config;
pub mod derive;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod merge;
pub mod orchestrator;
pub mod result;
pub mod schema;
pub mod settings;
pub mod storage;
pub mod table;
pub mod warehouse;

pub use error::{IngestError, Result};
pub use orchestrator::{FailurePolicy, IngestOrchestrator, IngestRequest};
pub use result::{IngestionReport, IngestionResult, IngestionStatus};
pub use table::{Payload, Row, Table};
