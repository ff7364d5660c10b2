//! Plan data model.
//!
//! A plan is produced by an external planning stage (typically an LLM)
//! and handed to this crate as data. Steps execute strictly in order:
//! later steps may consume slots and approval tokens produced by
//! earlier ones, so ordering is semantically significant.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of an action's potential harm.
///
/// Levels are independent policy switches, not an ordered threshold —
/// a host may allow `exec` while still gating `write`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Read,
    Write,
    Exec,
    Net,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Read => "read",
            RiskLevel::Write => "write",
            RiskLevel::Exec => "exec",
            RiskLevel::Net => "net",
        };
        f.write_str(name)
    }
}

/// Scripting language of an `exec_code` step.
///
/// Only `node` has a sandbox implementation; `shell` is accepted by the
/// parser but rejected by the engine with an unsupported-language error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Node,
    Shell,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Node => "node",
            Language::Shell => "shell",
        };
        f.write_str(name)
    }
}

/// One step of a plan. Closed variant — every dispatch site matches
/// exhaustively so a new kind cannot be silently swallowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    /// Invoke a named tool capability with (possibly slot-referencing)
    /// arguments.
    UseTool {
        tool: String,
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_as: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_estimate: Option<u64>,
    },
    /// Run untrusted code in the sandbox.
    ExecCode {
        language: Language,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_as: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_estimate: Option<u64>,
    },
    /// Ask the approval collaborator for consent, arming a single-use
    /// approval token on acceptance.
    AskApproval {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preview_slot: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        risk: Option<RiskLevel>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_estimate: Option<u64>,
    },
    /// Render named slots into a user-visible digest. Clears any pending
    /// approval token: a summary introduces new reviewable context that a
    /// stale approval no longer covers.
    Summarize {
        inputs: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_as: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_estimate: Option<u64>,
    },
}

impl PlanStep {
    /// Short kind name used in events, audit records and log lines.
    pub fn kind_name(&self) -> &'static str {
        match self {
            PlanStep::UseTool { .. } => "use_tool",
            PlanStep::ExecCode { .. } => "exec_code",
            PlanStep::AskApproval { .. } => "ask_approval",
            PlanStep::Summarize { .. } => "summarize",
        }
    }

    /// Slot name this step's result should be stored under, if any.
    pub fn save_as(&self) -> Option<&str> {
        match self {
            PlanStep::UseTool { save_as, .. }
            | PlanStep::ExecCode { save_as, .. }
            | PlanStep::Summarize { save_as, .. } => save_as.as_deref(),
            PlanStep::AskApproval { .. } => None,
        }
    }

    /// Caller-supplied cost estimate, defaulting to zero when the planner
    /// did not provide one.
    pub fn token_estimate(&self) -> u64 {
        match self {
            PlanStep::UseTool { token_estimate, .. }
            | PlanStep::ExecCode { token_estimate, .. }
            | PlanStep::AskApproval { token_estimate, .. }
            | PlanStep::Summarize { token_estimate, .. } => token_estimate.unwrap_or(0),
        }
    }
}

/// A declarative plan: a goal, the planner's rationale, and an ordered
/// sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    pub rationale: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Parses a plan from planner-produced JSON.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let plan = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("failed to parse plan JSON: {e}"))?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_plan() {
        let raw = json!({
            "goal": "inspect the workspace",
            "rationale": "read before writing",
            "steps": [
                {"kind": "use_tool", "tool": "read_file", "args": {"path": "notes.md"},
                 "save_as": "contents", "token_estimate": 10},
                {"kind": "ask_approval", "reason": "apply edit", "preview_slot": "contents"},
                {"kind": "use_tool", "tool": "write_file",
                 "args": {"path": "notes.md", "value": {"$slot": "contents"}}},
                {"kind": "exec_code", "language": "node", "code": "console.log(1)"},
                {"kind": "summarize", "inputs": ["contents"], "save_as": "digest"}
            ]
        })
        .to_string();

        let plan = Plan::from_json(&raw).unwrap();
        assert_eq!(plan.goal, "inspect the workspace");
        assert_eq!(plan.steps.len(), 5);

        match &plan.steps[0] {
            PlanStep::UseTool { tool, save_as, .. } => {
                assert_eq!(tool, "read_file");
                assert_eq!(save_as.as_deref(), Some("contents"));
            }
            other => panic!("expected use_tool, got {}", other.kind_name()),
        }
        match &plan.steps[3] {
            PlanStep::ExecCode { language, .. } => assert_eq!(*language, Language::Node),
            other => panic!("expected exec_code, got {}", other.kind_name()),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let raw = json!({
            "goal": "g",
            "rationale": "r",
            "steps": [{"kind": "teleport", "to": "prod"}]
        })
        .to_string();
        assert!(Plan::from_json(&raw).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_required_field() {
        // use_tool without args
        let raw = json!({
            "goal": "g",
            "rationale": "r",
            "steps": [{"kind": "use_tool", "tool": "read_file"}]
        })
        .to_string();
        assert!(Plan::from_json(&raw).is_err());
    }

    #[test]
    fn test_token_estimate_defaults_to_zero() {
        let step = PlanStep::Summarize {
            inputs: vec!["a".to_string()],
            save_as: None,
            token_estimate: None,
        };
        assert_eq!(step.token_estimate(), 0);
    }

    #[test]
    fn test_save_as_accessor() {
        let step = PlanStep::AskApproval {
            reason: "why".to_string(),
            preview_slot: None,
            risk: None,
            token_estimate: None,
        };
        assert!(step.save_as().is_none());

        let step = PlanStep::ExecCode {
            language: Language::Node,
            code: String::new(),
            save_as: Some("out".to_string()),
            token_estimate: None,
        };
        assert_eq!(step.save_as(), Some("out"));
    }

    #[test]
    fn test_risk_level_display() {
        assert_eq!(RiskLevel::Read.to_string(), "read");
        assert_eq!(RiskLevel::Net.to_string(), "net");
    }

    #[test]
    fn test_language_roundtrip() {
        let lang: Language = serde_json::from_str("\"shell\"").unwrap();
        assert_eq!(lang, Language::Shell);
        assert_eq!(serde_json::to_string(&Language::Node).unwrap(), "\"node\"");
    }
}
