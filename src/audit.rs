//! Audit trail collaborator.
//!
//! The engine appends structured records for plan boundaries, step
//! timing, tool invocations, approval decisions and code execution.
//! Recording is best-effort and asynchronous: a failing sink must never
//! abort or stall the run, and persistent failures are logged once
//! rather than retried unboundedly. The core defines only the record
//! shape; storage beyond the bundled JSONL log is a host concern.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::plan::RiskLevel;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    PlanStarted {
        run_id: String,
        goal: String,
        steps: usize,
    },
    StepFinished {
        run_id: String,
        index: usize,
        kind: &'static str,
        duration_ms: u64,
        token_estimate: u64,
    },
    StepFailed {
        run_id: String,
        index: usize,
        error: String,
    },
    ToolInvoked {
        run_id: String,
        tool: String,
        risk: RiskLevel,
    },
    ApprovalDecision {
        run_id: String,
        reason: String,
        risk: RiskLevel,
        approved: bool,
    },
    CodeExecuted {
        run_id: String,
        language: String,
        exit_code: i32,
        timed_out: bool,
    },
    PlanFinished {
        run_id: String,
        steps_run: usize,
        tools_invoked: usize,
        code_steps: usize,
        duration_ms: u64,
    },
}

/// Consumes audit records. Implementations swallow their own errors —
/// the signature is deliberately infallible.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Discards every record.
pub struct NullAudit;

#[async_trait]
impl AuditSink for NullAudit {
    async fn record(&self, _record: AuditRecord) {}
}

/// Appends records as JSON lines to `<dir>/audit.log`, creating the
/// directory on demand. Each line carries an RFC 3339 timestamp.
pub struct FileAuditLog {
    dir: PathBuf,
    warned: AtomicBool,
}

impl FileAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            warned: AtomicBool::new(false),
        }
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("audit.log")
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for FileAuditLog {
    async fn record(&self, record: AuditRecord) {
        let mut value = match serde_json::to_value(&record) {
            Ok(value) => value,
            Err(e) => {
                if !self.warned.swap(true, Ordering::Relaxed) {
                    warn!("Failed to serialize audit record: {e}");
                }
                return;
            }
        };
        value["ts"] = json!(chrono::Utc::now().to_rfc3339());

        if let Err(e) = self.append(&value.to_string()).await {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!("Failed to record audit event: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_audit_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let audit = FileAuditLog::new(dir.path().join("audit"));

        audit
            .record(AuditRecord::PlanStarted {
                run_id: "r1".to_string(),
                goal: "demo".to_string(),
                steps: 2,
            })
            .await;
        audit
            .record(AuditRecord::ToolInvoked {
                run_id: "r1".to_string(),
                tool: "read_file".to_string(),
                risk: RiskLevel::Read,
            })
            .await;

        let content =
            std::fs::read_to_string(dir.path().join("audit").join("audit.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "plan_started");
        assert_eq!(first["steps"], 2);
        assert!(first["ts"].as_str().unwrap().contains('T'));

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "tool_invoked");
        assert_eq!(second["risk"], "read");
    }

    #[tokio::test]
    async fn test_file_audit_failure_warns_once_and_does_not_panic() {
        // A file where the directory should be forces create_dir_all to fail.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let audit = FileAuditLog::new(&blocker);
        audit
            .record(AuditRecord::StepFailed {
                run_id: "r1".to_string(),
                index: 0,
                error: "boom".to_string(),
            })
            .await;
        assert!(audit.warned.load(Ordering::Relaxed));

        // second failure stays quiet but must still be safe
        audit
            .record(AuditRecord::StepFailed {
                run_id: "r1".to_string(),
                index: 1,
                error: "boom".to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn test_null_audit_is_noop() {
        NullAudit
            .record(AuditRecord::PlanFinished {
                run_id: "r1".to_string(),
                steps_run: 0,
                tools_invoked: 0,
                code_steps: 0,
                duration_ms: 0,
            })
            .await;
    }
}
