//! FPL Ingest - batch jobs for the fantasy.premierleague API

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use fpl_common::logging::{init_logging, LogConfig, LogLevel};
use fpl_ingest::cache::EndpointCache;
use fpl_ingest::config::AppConfig;
use fpl_ingest::derive::{TableDeriver, TransformRegistry};
use fpl_ingest::fetch::{FetcherRegistry, HttpFetcher};
use fpl_ingest::jobs::{self, teams_for_task};
use fpl_ingest::orchestrator::{IngestOrchestrator, IngestRequest};
use fpl_ingest::result::failures;
use fpl_ingest::schema::SchemaLoader;
use fpl_ingest::settings::Settings;
use fpl_ingest::storage::{LocalStorage, ObjectStorage, S3Storage, StorageBackend};
use fpl_ingest::warehouse::postgres::{PostgresConfig, PostgresWarehouse};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Teams used by test runs of the players job
const TEST_TEAMS: [u32; 2] = [1, 2];

#[derive(Parser, Debug)]
#[command(name = "fpl-ingest")]
#[command(author, version, about = "Fantasy Premier League ingestion jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Refresh fixtures, and after a match day the overview tables and player history
    Daily {
        /// Ingest a small fixed subset regardless of yesterday's fixtures
        #[arg(long)]
        test: bool,

        /// Day to run for (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Stage player history for this task's teams to object storage
    Players {
        #[arg(long, env = "CLOUD_RUN_TASK_INDEX", default_value_t = 0)]
        task_index: u32,

        #[arg(long, env = "CLOUD_RUN_TASK_ATTEMPT", default_value_t = 0)]
        task_attempt: u32,

        #[arg(long)]
        test: bool,

        /// Top-level directory in the bucket (defaults to BLOB_DIR)
        #[arg(long)]
        output_dir: Option<String>,
    },

    /// Load the staged player history of one day into the warehouse
    LoadHistory {
        /// Staging day (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Top-level directory the files were staged under (defaults to BLOB_DIR)
        #[arg(long)]
        output_dir: Option<String>,
    },

    /// Ingest a single table
    Ingest {
        #[arg(long)]
        endpoint: String,

        #[arg(long)]
        table: String,

        /// Refetch the endpoint
        #[arg(long)]
        refresh: bool,

        /// Replace the destination table contents
        #[arg(long)]
        full_refresh: bool,
    },

    /// Ingest every sweep table of an endpoint
    IngestEndpoint {
        #[arg(long)]
        endpoint: String,

        /// Restrict to these tables
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Keep the endpoint cached afterwards
        #[arg(long)]
        keep_cache: bool,
    },

    /// Check the endpoint configuration without touching the network
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    // Environment variables take precedence over the flag
    let log_config = LogConfig::default()
        .level(log_level)
        .log_file_prefix("fpl-ingest")
        .with_env()?;
    let _guard = init_logging(&log_config)?;

    let settings = Settings::from_env().context("Invalid settings")?;
    let today = Utc::now().date_naive();

    match cli.command {
        Command::Daily { test, date } => {
            let mut orchestrator = build_orchestrator(&settings).await?;
            let report = jobs::run_daily_pipeline(&mut orchestrator, date.unwrap_or(today), test).await?;
            info!(
                fixture_date = %report.fixture_date,
                fixtures = report.fixtures.len(),
                tables = report.table_count(),
                failed = report.failed(),
                report = %serde_json::to_string(&report)?,
                "Daily pipeline finished"
            );
        },
        Command::Players {
            task_index,
            task_attempt,
            test,
            output_dir,
        } => {
            info!("Starting Task #{task_index}, Attempt #{task_attempt}...");
            let teams = if test {
                TEST_TEAMS.to_vec()
            } else {
                teams_for_task(task_index)
            };
            info!(?teams, "Running for teams");

            let output_dir = output_dir.unwrap_or_else(|| settings.blob_dir.clone());
            let outcome = async {
                let mut orchestrator = build_orchestrator(&settings).await?;
                jobs::run_players_to_storage(&mut orchestrator, &teams, today, &output_dir).await?;
                anyhow::Ok(())
            }
            .await;

            if let Err(e) = outcome {
                error!("Task #{task_index}, Attempt #{task_attempt} failed: {e:#}");
                return Err(e);
            }
            info!("Completed Task #{task_index}.");
        },
        Command::LoadHistory { date, output_dir } => {
            let orchestrator = build_orchestrator(&settings).await?;
            let output_dir = output_dir.unwrap_or_else(|| settings.blob_dir.clone());
            let loaded =
                jobs::load_player_history_from_uri(&orchestrator, date.unwrap_or(today), &output_dir).await?;
            info!(destination = %loaded.id, rows = loaded.rows_loaded, "Player history loaded");
        },
        Command::Ingest {
            endpoint,
            table,
            refresh,
            full_refresh,
        } => {
            let mut orchestrator = build_orchestrator(&settings).await?;
            let mut request = IngestRequest::default().refresh(refresh);
            if full_refresh {
                request = request.full_refresh();
            }
            let result = orchestrator.ingest_table(&endpoint, &table, &request).await;
            if let Some(e) = result.error {
                bail!("Table {endpoint}.{table} failed to ingest: {e}");
            }
        },
        Command::IngestEndpoint {
            endpoint,
            tables,
            keep_cache,
        } => {
            let mut orchestrator = build_orchestrator(&settings).await?;
            let subset = (!tables.is_empty()).then_some(tables.as_slice());
            let report = orchestrator
                .ingest_all_tables_for_endpoint(&endpoint, subset, !keep_cache)
                .await?;
            let failed = failures(&report);
            if failed > 0 {
                warn!(endpoint = %endpoint, failed, total = report.len(), "Some tables failed to ingest");
            }
            info!(report = %serde_json::to_string(&report)?, "Endpoint ingestion finished");
        },
        Command::ValidateConfig => {
            let config = AppConfig::from_path(&settings.config_path)
                .with_context(|| format!("Failed to load {}", settings.config_path.display()))?;
            for endpoint in &config.api.endpoints {
                info!(
                    endpoint = %endpoint.id,
                    url = %endpoint.url(&config.api.base),
                    tables = ?endpoint.table_names(),
                    "Endpoint configuration valid"
                );
            }
            TableDeriver::from_config(&config, TransformRegistry::default())?;
        },
    }

    Ok(())
}

async fn build_orchestrator(settings: &Settings) -> Result<IngestOrchestrator> {
    let config = AppConfig::from_path(&settings.config_path)
        .with_context(|| format!("Failed to load {}", settings.config_path.display()))?;
    info!(base = %config.api.base, endpoints = ?config.endpoint_ids(), "Loaded config for api");

    let client = HttpFetcher::build_client(settings.http_timeout())?;
    let cache = EndpointCache::new(
        FetcherRegistry::from_config(&config, client),
        TableDeriver::from_config(&config, TransformRegistry::default())?,
    );

    let storage: Arc<dyn ObjectStorage> = match settings.storage.backend {
        StorageBackend::S3 => Arc::new(S3Storage::new(&settings.storage)?),
        StorageBackend::Local => Arc::new(LocalStorage::new(
            &settings.storage.local_dir,
            &settings.storage.bucket,
        )),
    };
    let warehouse = PostgresWarehouse::connect(&PostgresConfig::from_env()?, storage.clone())
        .await
        .context("Failed to connect to the warehouse")?;

    Ok(IngestOrchestrator::new(
        config,
        cache,
        storage,
        Arc::new(warehouse),
        SchemaLoader::new(&settings.schema_dir),
        &settings.dataset,
    )
    .with_blob_dir(&settings.blob_dir)
    .with_failure_policy(settings.failure_policy))
}
