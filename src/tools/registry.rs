//! Explicit, host-owned tool registry.
//!
//! The host constructs one registry, registers its capabilities, and
//! passes it to the validator and the engine. Keeping the mapping
//! explicit (rather than a process-global) makes runs reproducible and
//! lets tests swap in fakes freely.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::Tool;

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registers a tool under its own name. Re-registering a name
    /// replaces the previous capability.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!("Registering tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted for stable error messages.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
