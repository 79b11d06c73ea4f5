//! Record input and result output
//!
//! The pipeline itself only sees `Vec<RawRecord>` in and `RunReport` out;
//! these traits are the adapters the binary uses at either end.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::orchestrator::RunReport;
use crate::types::RawRecord;

#[async_trait]
pub trait RecordLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<RawRecord>>;
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn write(&self, report: &RunReport) -> Result<()>;
}

/// Reads a JSON array of `{name, location, postcode}` objects
#[derive(Debug, Clone)]
pub struct JsonRecordLoader {
    path: PathBuf,
}

impl JsonRecordLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl RecordLoader for JsonRecordLoader {
    async fn load(&self) -> Result<Vec<RawRecord>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let records: Vec<RawRecord> = serde_json::from_str(&text)?;
        tracing::info!(path = %self.path.display(), records = records.len(), "Loaded input records");
        Ok(records)
    }
}

/// Writes the full run report as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonResultSink {
    path: PathBuf,
}

impl JsonResultSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ResultSink for JsonResultSink {
    async fn write(&self, report: &RunReport) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(report)?;
        tokio::fs::write(&self.path, body).await?;
        tracing::info!(path = %self.path.display(), records = report.records.len(), "Wrote results");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::RunStats;
    use crate::types::{EnrichedRecord, RecordStatus};
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_load_records_and_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("playgrounds.json");
        tokio::fs::write(
            &input,
            r#"[{"name": "Clissold Park", "location": "Stoke Newington", "postcode": "N16 9HJ"}]"#,
        )
        .await
        .unwrap();

        let records = JsonRecordLoader::new(&input).load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].postcode, "N16 9HJ");

        let report = RunReport {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            records: vec![EnrichedRecord::bare(
                records[0].clone(),
                RecordStatus::Failed,
                vec![],
            )],
            stats: RunStats::default(),
        };
        let output = dir.path().join("out/enriched.json");
        JsonResultSink::new(&output).write(&report).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&output).await.unwrap()).unwrap();
        assert_eq!(written["records"][0]["status"], "failed");
        assert_eq!(written["records"][0]["original"]["name"], "Clissold Park");
    }

    #[tokio::test]
    async fn test_missing_input_is_io_error() {
        let err = JsonRecordLoader::new("/nonexistent/records.json")
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::EnrichError::Io(_)));
    }
}
