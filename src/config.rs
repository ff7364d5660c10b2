//! Execution policy configuration.
//!
//! Policies are read-only inputs for the duration of a run. Hosts can
//! build them programmatically or load them from a TOML file with
//! `${ENV_VAR}` substitution.

use std::collections::HashSet;

use serde::Deserialize;

use crate::plan::RiskLevel;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ExecutionPolicies {
    /// Tools that proceed without approval regardless of risk
    /// (network risk excepted — that switch has no override).
    #[serde(default)]
    pub auto_approve_tools: HashSet<String>,
    #[serde(default)]
    pub allow_risks: RiskPolicy,
    #[serde(default)]
    pub sandbox: SandboxLimits,
    #[serde(default)]
    pub limits: PlanLimits,
}

/// Per-risk-level switches. Independent booleans, not a threshold:
/// a level that is globally allowed proceeds without any approval.
#[derive(Debug, Deserialize, Clone)]
pub struct RiskPolicy {
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub exec: bool,
    #[serde(default)]
    pub net: bool,
}

impl RiskPolicy {
    pub fn allows(&self, risk: RiskLevel) -> bool {
        match risk {
            RiskLevel::Read => self.read,
            RiskLevel::Write => self.write,
            RiskLevel::Exec => self.exec,
            RiskLevel::Net => self.net,
        }
    }
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            exec: false,
            net: false,
        }
    }
}

/// Resource ceilings for the code sandbox.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxLimits {
    /// Wall-clock ceiling; the subprocess is killed on expiry.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Heap ceiling passed to the runtime (`--max-old-space-size`).
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    /// Modules importable by sandboxed code. Relative specifiers are
    /// always allowed.
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: HashSet<String>,
    /// Per-stream byte ceiling on captured stdout/stderr.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            memory_limit_mb: default_memory_limit_mb(),
            allowed_modules: default_allowed_modules(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Static plan ceilings checked by the validator.
#[derive(Debug, Deserialize, Clone)]
pub struct PlanLimits {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Ceiling on the cumulative per-step cost estimates.
    #[serde(default = "default_max_token_budget")]
    pub max_token_budget: u64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_token_budget: default_max_token_budget(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    8_000
}

fn default_memory_limit_mb() -> u64 {
    64
}

fn default_allowed_modules() -> HashSet<String> {
    ["fs", "path", "crypto"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_output_bytes() -> usize {
    512
}

fn default_max_steps() -> usize {
    16
}

fn default_max_token_budget() -> u64 {
    8_000
}

impl ExecutionPolicies {
    /// Loads policies from a TOML file, expanding `${ENV_VAR}`
    /// references first.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = shellexpand::env(&content)?;
        let policies: ExecutionPolicies = toml::from_str(&expanded)?;
        Ok(policies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policies = ExecutionPolicies::default();
        assert!(policies.auto_approve_tools.is_empty());
        assert!(policies.allow_risks.read);
        assert!(!policies.allow_risks.write);
        assert!(!policies.allow_risks.exec);
        assert!(!policies.allow_risks.net);
        assert_eq!(policies.sandbox.timeout_ms, 8_000);
        assert_eq!(policies.sandbox.memory_limit_mb, 64);
        assert_eq!(policies.sandbox.max_output_bytes, 512);
        assert!(policies.sandbox.allowed_modules.contains("fs"));
        assert!(policies.sandbox.allowed_modules.contains("path"));
        assert!(policies.sandbox.allowed_modules.contains("crypto"));
        assert!(!policies.sandbox.allowed_modules.contains("net"));
        assert_eq!(policies.limits.max_steps, 16);
        assert_eq!(policies.limits.max_token_budget, 8_000);
    }

    #[test]
    fn test_risk_policy_allows() {
        let policy = RiskPolicy {
            read: true,
            write: false,
            exec: true,
            net: false,
        };
        assert!(policy.allows(RiskLevel::Read));
        assert!(!policy.allows(RiskLevel::Write));
        assert!(policy.allows(RiskLevel::Exec));
        assert!(!policy.allows(RiskLevel::Net));
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            auto_approve_tools = ["list_dir"]

            [allow_risks]
            read = true
            write = true

            [sandbox]
            timeout_ms = 2000
            memory_limit_mb = 32
            allowed_modules = ["fs"]
            max_output_bytes = 1024

            [limits]
            max_steps = 8
            max_token_budget = 500
        "#;
        let policies: ExecutionPolicies = toml::from_str(toml_str).unwrap();
        assert!(policies.auto_approve_tools.contains("list_dir"));
        assert!(policies.allow_risks.write);
        // unspecified switches fall back to their defaults
        assert!(!policies.allow_risks.exec);
        assert_eq!(policies.sandbox.timeout_ms, 2000);
        assert_eq!(policies.sandbox.allowed_modules.len(), 1);
        assert_eq!(policies.limits.max_steps, 8);
    }

    #[test]
    fn test_parse_empty_toml_uses_defaults() {
        let policies: ExecutionPolicies = toml::from_str("").unwrap();
        assert!(policies.allow_risks.read);
        assert_eq!(policies.sandbox.timeout_ms, 8_000);
    }

    #[test]
    fn test_load_expands_env_vars() {
        std::env::set_var("STRIDE_TEST_TIMEOUT", "1234");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.toml");
        std::fs::write(&path, "[sandbox]\ntimeout_ms = ${STRIDE_TEST_TIMEOUT}\n").unwrap();

        let policies = ExecutionPolicies::load(path.to_str().unwrap()).unwrap();
        assert_eq!(policies.sandbox.timeout_ms, 1234);
    }
}
