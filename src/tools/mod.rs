pub mod registry;

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::plan::RiskLevel;

/// One declared parameter of a tool's argument schema.
///
/// The validator checks plan arguments against these declarations:
/// every required parameter must be supplied and no undeclared key is
/// accepted.
#[derive(Debug, Clone, Serialize)]
pub struct ToolParam {
    pub name: String,
    /// Informal type name shown in previews and error messages
    /// (e.g. "string", "object").
    pub param_type: String,
    pub required: bool,
}

impl ToolParam {
    pub fn required(name: &str, param_type: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: false,
        }
    }
}

/// Best-effort channel for user-visible messages.
///
/// Tools and the engine's summarize step write through this sink.
/// A missing or closed receiver never fails the sender: user-facing
/// output is an observation channel, not part of the execution path.
#[derive(Clone)]
pub struct MessageSink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl MessageSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            if tx.send(message.into()).is_err() {
                debug!("message receiver dropped, discarding user message");
            }
        }
    }
}

/// Scoped execution context handed to a tool invocation.
pub struct ToolContext {
    /// Working directory of the current run.
    pub cwd: PathBuf,
    /// Environment mapping for subprocesses the tool may spawn.
    pub env: HashMap<String, String>,
    /// Sink for user-visible progress messages.
    pub messages: MessageSink,
}

/// A tool capability the engine can invoke on behalf of a plan.
///
/// Concrete implementations (file access, directory listing, ...) are
/// owned by the host. The engine consumes them only through this trait
/// and the registry passed to it — there is no ambient global lookup.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique identifier referenced by `use_tool` steps.
    fn name(&self) -> &str;

    /// Human-readable description, surfaced to planners and hosts.
    fn description(&self) -> &str;

    /// Risk classification consulted by the policy gate.
    fn risk(&self) -> RiskLevel;

    /// Declared argument schema. Empty means "no arguments accepted".
    fn params(&self) -> Vec<ToolParam> {
        vec![]
    }

    /// Tools marked auto-approve skip the approval gate entirely
    /// (except for the network hard switch).
    fn auto_approve(&self) -> bool {
        false
    }

    /// Optional human-readable preview of what running with `args`
    /// would do, shown in approval prompts. `None` falls back to a
    /// generic rendering of the resolved arguments.
    fn preview(&self, _args: &Value) -> Option<String> {
        None
    }

    /// Execute the tool with fully resolved arguments.
    async fn run(&self, args: Value, context: &ToolContext) -> anyhow::Result<Value>;
}

pub use registry::ToolRegistry;
