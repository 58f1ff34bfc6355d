//! Rolled-back consolidation log
//!
//! A failed consolidation transaction leaves nothing in the database, so the
//! failure is appended as one JSON line to a plain file instead.

use chrono::{DateTime, Utc};
use kgc_common::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Type being processed when the error occurred, if any
    pub entity_type: Option<String>,
    pub interview_id: String,
    pub error: String,
    pub rollback_timestamp: DateTime<Utc>,
    pub rollback_reason: String,
}

#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    pub async fn record(&self, record: &FailureRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// All records; a missing file reads as empty
    pub async fn read_all(&self) -> Result<Vec<FailureRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = FailureLog::new(dir.path().join("logs").join("failures.jsonl"));
        assert!(log.read_all().await.unwrap().is_empty());

        for interview in ["int-1", "int-2"] {
            log.record(&FailureRecord {
                entity_type: Some("system".into()),
                interview_id: interview.into(),
                error: "Database error: disk I/O error".into(),
                rollback_timestamp: Utc::now(),
                rollback_reason: "entity processing failed".into(),
            })
            .await
            .unwrap();
        }

        let records = log.read_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].interview_id, "int-2");
    }
}
