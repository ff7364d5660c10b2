//! Error taxonomy for plan validation and execution.
//!
//! Validation errors carry the failing step index and prevent any
//! execution from starting. Runtime errors abort all remaining steps
//! immediately; the engine wraps them in [`ExecError::Step`] so the
//! caller always learns which step failed. A sandboxed subprocess's
//! non-zero exit is a normal result value, never an error.

use thiserror::Error;

use crate::plan::RiskLevel;

/// Static plan rejection, raised before any step executes.
#[derive(Debug, Clone, Error)]
#[error("{}", self.render())]
pub struct ValidationError {
    /// Index of the offending step; `None` for plan-level failures
    /// (step-count ceiling, dangling approval).
    pub step_index: Option<usize>,
    pub message: String,
}

impl ValidationError {
    /// A failure pinned to one step.
    pub fn at(step_index: usize, message: impl Into<String>) -> Self {
        Self {
            step_index: Some(step_index),
            message: message.into(),
        }
    }

    /// A plan-level failure not attributable to a single step.
    pub fn plan(message: impl Into<String>) -> Self {
        Self {
            step_index: None,
            message: message.into(),
        }
    }

    fn render(&self) -> String {
        match self.step_index {
            Some(index) => format!("step {index}: {}", self.message),
            None => self.message.clone(),
        }
    }
}

/// Fatal execution failure. Aborts the remaining plan with no retry.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("plan validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The plan names a tool the registry does not know. The validator
    /// catches this first; the engine re-checks defensively.
    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },

    /// Supplied arguments do not conform to the tool's declared schema.
    #[error("invalid arguments for tool '{tool}': {message}")]
    Schema { tool: String, message: String },

    /// A slot reference named a slot that has not been written, or a
    /// field projection that does not exist on the stored value.
    #[error("slot reference failed: {message}")]
    SlotReference { message: String },

    /// Network risk is a hard policy switch with no approval override.
    #[error("'{risk}' risk is disabled by policy ({subject})")]
    RiskDenied { subject: String, risk: RiskLevel },

    /// The approval collaborator denied consent.
    #[error("user rejected operation: {reason}")]
    UserRejected { reason: String },

    /// Sandboxed code references modules outside the allow-list.
    /// Detected by the static scan, before any process is spawned.
    #[error("sandboxed code references disallowed module(s): {}", modules.join(", "))]
    ModuleViolation { modules: Vec<String> },

    #[error("unsupported language '{language}'")]
    UnsupportedLanguage { language: String },

    /// Infrastructure-level sandbox failure (spawn, pipe or temp-file
    /// I/O). Subprocess failures are carried in the result instead.
    #[error("sandbox failure: {0}")]
    Sandbox(#[source] std::io::Error),

    /// A tool capability's own failure, opaque to the engine.
    #[error("tool '{tool}' failed: {source}")]
    Tool {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    /// Top-level wrapper added by the engine loop: identifies the step
    /// at which the run aborted.
    #[error("step {index} failed: {source}")]
    Step {
        index: usize,
        #[source]
        source: Box<ExecError>,
    },
}

impl ExecError {
    /// The failing step index, when the error has been attributed.
    pub fn step_index(&self) -> Option<usize> {
        match self {
            ExecError::Step { index, .. } => Some(*index),
            ExecError::Validation(err) => err.step_index,
            _ => None,
        }
    }
}
