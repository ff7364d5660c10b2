//! Approval collaborator interface.
//!
//! The engine blocks on this collaborator whenever a risk-gated action
//! needs human (or automated) consent. The core imposes no timeout —
//! a prompt may suspend indefinitely; bounding it is a host concern.

use async_trait::async_trait;
use serde::Serialize;

use crate::plan::RiskLevel;

/// What the collaborator is asked to approve.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    /// Why the action needs consent, in plain language.
    pub reason: String,
    /// Optional human-readable preview of the pending action
    /// (rendered arguments, a diff, truncated code, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    pub risk: RiskLevel,
    /// Set when the request gates a specific tool invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

/// Decides approval requests. `false` means denied; a collaborator
/// that cannot decide should deny (the gate fails closed).
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn ask(&self, request: &ApprovalRequest) -> bool;
}

/// Grants every request. Only suitable for trusted, non-interactive
/// hosts and tests.
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn ask(&self, _request: &ApprovalRequest) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_approve_grants() {
        let handler = AutoApprove;
        let request = ApprovalRequest {
            reason: "write file".to_string(),
            preview: None,
            risk: RiskLevel::Write,
            tool_name: Some("write_file".to_string()),
        };
        assert!(handler.ask(&request).await);
    }

    #[test]
    fn test_request_serializes_without_empty_fields() {
        let request = ApprovalRequest {
            reason: "run code".to_string(),
            preview: None,
            risk: RiskLevel::Exec,
            tool_name: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["reason"], "run code");
        assert_eq!(value["risk"], "exec");
        assert!(value.get("preview").is_none());
        assert!(value.get("tool_name").is_none());
    }
}
