//! Per-table ingestion outcomes

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Success,
    Fail,
}

/// Outcome of one `ingest_table` call; never modified after creation
#[derive(Debug, Serialize)]
pub struct IngestionResult {
    pub endpoint: String,
    pub table: String,
    pub status: IngestionStatus,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_error")]
    pub error: Option<IngestError>,
    /// Rows written on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
}

impl IngestionResult {
    pub fn success(endpoint: impl Into<String>, table: impl Into<String>, rows: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            table: table.into(),
            status: IngestionStatus::Success,
            error: None,
            rows: Some(rows),
        }
    }

    pub fn fail(endpoint: impl Into<String>, table: impl Into<String>, error: IngestError) -> Self {
        Self {
            endpoint: endpoint.into(),
            table: table.into(),
            status: IngestionStatus::Fail,
            error: Some(error),
            rows: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == IngestionStatus::Success
    }
}

fn serialize_error<S: Serializer>(error: &Option<IngestError>, serializer: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct ErrorDetail<'a> {
        kind: &'a str,
        message: String,
    }

    match error {
        Some(e) => ErrorDetail {
            kind: e.kind(),
            message: e.to_string(),
        }
        .serialize(serializer),
        None => serializer.serialize_none(),
    }
}

/// Results of one bulk operation, keyed by table name
pub type IngestionReport = BTreeMap<String, IngestionResult>;

/// Count of failed entries in a report
pub fn failures(report: &IngestionReport) -> usize {
    report.values().filter(|r| !r.is_success()).count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_success_and_fail() {
        let ok = IngestionResult::success("bootstrap_static", "teams", 20);
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"endpoint": "bootstrap_static", "table": "teams", "status": "success", "rows": 20})
        );

        let failed = IngestionResult::fail(
            "bootstrap_static",
            "events",
            IngestError::verification_failed("fpl.events", "table was not updated"),
        );
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["status"], json!("fail"));
        assert_eq!(value["error"]["kind"], json!("verification_failed"));
    }

    #[test]
    fn test_failures_counted() {
        let mut report = IngestionReport::new();
        report.insert("teams".into(), IngestionResult::success("b", "teams", 1));
        report.insert(
            "events".into(),
            IngestionResult::fail("b", "events", IngestError::NotTabular("events".into())),
        );
        assert_eq!(failures(&report), 1);
    }
}
