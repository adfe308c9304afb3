//! Thread-safe tool table shared between the client and the agent loop.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Result, WormholeError};
use crate::request::ToolSpec;

use super::Tool;

/// Maps unique tool names to definitions.
///
/// Mutations are serialized under a write lock; lookups take the read lock
/// and are wait-free in the common (uncontended) case. Enumeration returns
/// a snapshot: an insert racing an enumeration is either fully included or
/// fully excluded, never observed partially.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. Names are unique; a duplicate is a validation
    /// error rather than a silent replacement.
    pub fn register(&self, tool: Tool) -> Result<()> {
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        let name = tool.name().to_string();
        if tools.contains_key(&name) {
            return Err(WormholeError::validation(format!(
                "tool '{name}' is already registered"
            )));
        }
        tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Removes a tool by name, returning it if present.
    pub fn unregister(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Snapshot of every registered tool, sorted by name for deterministic
    /// outbound request bodies.
    pub fn list(&self) -> Vec<Arc<Tool>> {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<_> = tools.values().cloned().collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }

    /// Wire-facing specs for every registered tool, in name order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.list().iter().map(|t| t.spec()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
