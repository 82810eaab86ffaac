use std::collections::HashMap;

use crate::tree::NodeId;

/// Rich-text markup of each page, keyed by the page's [`NodeId`].
///
/// A missing entry reads as empty content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentStore {
    entries: HashMap<NodeId, String>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: NodeId) -> &str {
        self.entries.get(&id).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, id: NodeId, content: impl Into<String>) {
        self.entries.insert(id, content.into());
    }

    /// Deletes the entry if present and returns its content.
    pub fn remove(&mut self, id: NodeId) -> Option<String> {
        self.entries.remove(&id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &str)> {
        self.entries.iter().map(|(id, content)| (*id, content.as_str()))
    }
}
