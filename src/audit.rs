//! One audit record per run, persisted outside the loop.
//!
//! Persistence is best effort: a failing sink is logged and never alters
//! the result already produced.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::state::{Status, TaskResult};

/// Flattened summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub task: String,
    pub code: String,
    /// All log entries joined by newlines.
    pub execution_output: String,
    pub status: Status,
    pub attempts: u32,
}

impl AuditRecord {
    pub fn new(task: &str, result: &TaskResult) -> Self {
        Self {
            id: result.task_id,
            timestamp: Utc::now(),
            task: task.to_string(),
            code: result.code.clone(),
            execution_output: result.logs.join("\n"),
            status: result.status,
            attempts: result.attempts,
        }
    }
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist(&self, record: &AuditRecord) -> Result<()>;
}

/// Appends one JSON object per line to a file.
#[derive(Debug, Clone)]
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn persist(&self, record: &AuditRecord) -> Result<()> {
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
            .await
            .map_err(|e| Error::Audit(format!("cannot open {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn persist(&self, _record: &AuditRecord) -> Result<()> {
        Ok(())
    }
}

/// Persists a record for `result`, swallowing sink failures.
pub async fn record_run(sink: &dyn AuditSink, task: &str, result: &TaskResult) {
    let record = AuditRecord::new(task, result);
    match sink.persist(&record).await {
        Ok(()) => tracing::debug!(record_id = %record.id, "audit record persisted"),
        Err(e) => tracing::warn!(record_id = %record.id, error = %e, "failed to persist audit record"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn result() -> TaskResult {
        TaskResult {
            task_id: Uuid::new_v4(),
            code: "print(1)".to_string(),
            logs: vec!["Error: boom".to_string(), "Success: 1".to_string()],
            status: Status::Success,
            attempts: 2,
        }
    }

    struct Failing;

    #[async_trait]
    impl AuditSink for Failing {
        async fn persist(&self, _record: &AuditRecord) -> Result<()> {
            Err(Error::Audit("database offline".to_string()))
        }
    }

    #[test]
    fn record_joins_logs() {
        let result = result();
        let record = AuditRecord::new("print one", &result);

        assert_eq!(record.id, result.task_id);
        assert_eq!(record.execution_output, "Error: boom\nSuccess: 1");
        assert_eq!(record.attempts, 2);
        assert_eq!(record.status, Status::Success);
    }

    #[tokio::test]
    async fn jsonl_sink_appends_one_line_per_run() {
        let dir = TempDir::new().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("audit").join("runs.jsonl"));

        record_run(&sink, "first", &result()).await;
        record_run(&sink, "second", &result()).await;

        let content = std::fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.task, "second");
        assert_eq!(parsed.code, "print(1)");
    }

    #[tokio::test]
    async fn failing_sink_does_not_alter_result() {
        let result = result();
        let before = result.clone();

        record_run(&Failing, "task", &result).await;

        assert_eq!(result, before);
    }

    #[tokio::test]
    async fn null_sink_accepts_everything() {
        let record = AuditRecord::new("t", &result());
        tokio_test::assert_ok!(NullAuditSink.persist(&record).await);
    }
}
