//! Batch jobs run by the scheduler
//!
//! The daily pipeline refreshes fixtures and, after a match day, the season
//! overview and player history. The players job is fanned out across tasks;
//! each task stages history for its slice of teams to object storage, and a
//! follow-up load reads every staged file for the day in one go.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::FileType;
use crate::error::{IngestError, Result};
use crate::fetch::FetchArgs;
use crate::orchestrator::{
    IngestOrchestrator, IngestRequest, BOOTSTRAP_STATIC, ELEMENT_SUMMARY, FIXTURES, TEAM_IDS,
};
use crate::result::{failures, IngestionReport};
use crate::storage::ObjectHandle;
use crate::table::Table;
use crate::warehouse::{LoadOptions, LoadSource, TableHandle, TableId, WriteDisposition};

pub const HISTORY_TABLE: &str = "history";

/// Teams handled by one task of the players job
pub const TEAMS_PER_TASK: u32 = 5;
const TASK_STRIDE: u32 = 4;

/// Test runs of the daily pipeline ingest only these overview tables
const TEST_BOOTSTRAP_TABLES: [&str; 2] = ["events", "teams"];
const TEST_TEAMS: [u32; 1] = [1];

#[derive(Debug, Serialize)]
pub struct DailyReport {
    /// The day whose fixtures decided whether to run
    pub fixture_date: NaiveDate,
    pub fixtures: Table,
    /// Results grouped by endpoint id, then table
    pub endpoints: BTreeMap<String, IngestionReport>,
}

impl DailyReport {
    pub fn table_count(&self) -> usize {
        self.endpoints.values().map(|report| report.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.endpoints.values().map(failures).sum()
    }
}

/// Refresh fixtures; after a match day also ingest the season overview and
/// the history of every player whose team played
pub async fn run_daily_pipeline(
    orchestrator: &mut IngestOrchestrator,
    today: NaiveDate,
    test: bool,
) -> Result<DailyReport> {
    let mut endpoints = BTreeMap::new();

    info!("Uploading the latest fixtures");
    let fixtures = orchestrator
        .ingest_table(FIXTURES, "fixtures", &IngestRequest::default())
        .await;
    endpoints.insert(FIXTURES.to_string(), IngestionReport::from([("fixtures".to_string(), fixtures)]));

    let yesterday = today
        .pred_opt()
        .ok_or_else(|| IngestError::InvalidConfig(format!("no day before {today}")))?;
    let day = orchestrator.get_fixtures(yesterday).await?;

    let (subset, teams) = if test {
        let subset: Vec<String> = TEST_BOOTSTRAP_TABLES.iter().map(|t| t.to_string()).collect();
        (Some(subset), TEST_TEAMS.to_vec())
    } else {
        (None, day.teams.clone())
    };

    if !day.fixtures.is_empty() || test {
        info!(endpoints = ?orchestrator.list_endpoints(), "Running ETL process for bootstrap static");
        let overview = orchestrator
            .ingest_all_tables_for_endpoint(BOOTSTRAP_STATIC, subset.as_deref(), true)
            .await?;
        endpoints.insert(BOOTSTRAP_STATIC.to_string(), overview);

        info!(?teams, "Running ETL process for element history");
        let history = orchestrator
            .ingest_player_history_for_teams(&teams, true, false)
            .await?;
        endpoints.insert(ELEMENT_SUMMARY.to_string(), history);
        info!("ETL successful");
    } else {
        info!(date = %yesterday, "No fixtures played yesterday");
    }

    Ok(DailyReport {
        fixture_date: yesterday,
        fixtures: day.fixtures,
        endpoints,
    })
}

/// `<output_dir>/history/full_refresh/<YYYYMMDD>/history_<team>.csv`
pub fn player_history_key(output_dir: &str, date: NaiveDate, team: u32) -> String {
    format!(
        "{}/{HISTORY_TABLE}_{team}.{}",
        player_history_dir(output_dir, date),
        FileType::Csv.extension()
    )
}

fn player_history_dir(output_dir: &str, date: NaiveDate) -> String {
    format!(
        "{}/{HISTORY_TABLE}/full_refresh/{}",
        output_dir.trim_end_matches('/'),
        date.format("%Y%m%d")
    )
}

/// Stage player history for each team as CSV, one file per team
///
/// The element summary endpoint is released after every team so only one
/// team's players are held in memory.
pub async fn run_players_to_storage(
    orchestrator: &mut IngestOrchestrator,
    teams: &[u32],
    today: NaiveDate,
    output_dir: &str,
) -> Result<Vec<ObjectHandle>> {
    info!(table = HISTORY_TABLE, ?teams, "Staging player history");
    let mut staged = Vec::with_capacity(teams.len());

    for &team in teams {
        info!(team, "Downloading players from team");
        let elements = orchestrator.list_elements(&[team]).await?;
        let args = FetchArgs::for_elements(elements).with_tables(vec![HISTORY_TABLE.to_string()]);
        let history = orchestrator
            .get_table(ELEMENT_SUMMARY, HISTORY_TABLE, true, &args)
            .await?;

        let key = player_history_key(output_dir, today, team);
        let handle = orchestrator.storage().write(&history, &key, FileType::Csv).await?;
        info!(team, uri = %handle.uri, rows = history.len(), "Staged player history");
        staged.push(handle);

        info!(endpoint = ELEMENT_SUMMARY, "Releasing endpoint from cache and downloading next team");
        orchestrator.release_endpoint(ELEMENT_SUMMARY)?;
    }

    Ok(staged)
}

/// Load every history file staged under `output_dir` for `date` into
/// `<dataset>.history`
pub async fn load_player_history_from_uri(
    orchestrator: &IngestOrchestrator,
    date: NaiveDate,
    output_dir: &str,
) -> Result<TableHandle> {
    let pattern = format!("{}/*", player_history_dir(output_dir, date));
    let storage = orchestrator.storage();
    let source = LoadSource::from_pattern(&pattern, |key| storage.handle(key));
    let schema = orchestrator.schemas().load(HISTORY_TABLE)?;
    let options = LoadOptions {
        write_disposition: WriteDisposition::WriteTruncate,
        file_type: FileType::Csv,
        schema: Some(schema),
        ..Default::default()
    };
    let destination = TableId::new(orchestrator.dataset(), HISTORY_TABLE);

    info!(source = %source, destination = %destination, "Loading player history");
    orchestrator.warehouse().load(&source, &destination, &options).await
}

/// Team ids for a players-job task: `1 + 4i ..= 5 + 4i`, capped at 20
pub fn teams_for_task(task_index: u32) -> Vec<u32> {
    let first = task_index.saturating_mul(TASK_STRIDE).saturating_add(1);
    let (teams, dropped): (Vec<u32>, Vec<u32>) = (0..TEAMS_PER_TASK)
        .map(|offset| first.saturating_add(offset))
        .partition(|team| TEAM_IDS.contains(team));
    if !dropped.is_empty() {
        warn!(task_index, ?dropped, "Dropping team ids out of range");
    }
    teams
}
