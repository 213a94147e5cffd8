//! Directory history extension
//!
//! Remembers recently visited directories and persists them with the rest of
//! the configuration when unloaded.

use async_trait::async_trait;

use crate::core::version::extension_api_version;
use crate::plugin::traits::{ExtensionInfo, ExtensionModule};

const DEFAULT_CAPACITY: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryHistory {
    recent: Vec<String>,
    capacity: usize,
}

impl Default for DirectoryHistory {
    fn default() -> Self {
        Self {
            recent: Vec::new(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl DirectoryHistory {
    /// Record a visit; the most recent entry comes first
    pub fn visit(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.recent.retain(|existing| existing != &path);
        self.recent.insert(0, path);
        self.recent.truncate(self.capacity);
    }

    pub fn recent(&self) -> &[String] {
        &self.recent
    }
}

#[async_trait]
impl ExtensionModule for DirectoryHistory {
    fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            name: "directory-history".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: extension_api_version(),
        }
    }

    fn configuration(&self) -> Option<toml::Table> {
        let mut table = toml::Table::new();
        table.insert(
            "recent".to_string(),
            toml::Value::Array(self.recent.iter().cloned().map(toml::Value::String).collect()),
        );
        table.insert(
            "capacity".to_string(),
            toml::Value::Integer(self.capacity as i64),
        );
        Some(table)
    }

    fn restore_configuration(&mut self, section: &toml::Table) {
        if let Some(capacity) = section.get("capacity").and_then(|v| v.as_integer()) {
            self.capacity = capacity.clamp(1, 1000) as usize;
        }
        if let Some(recent) = section.get("recent").and_then(|v| v.as_array()) {
            self.recent = recent
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .take(self.capacity)
                .collect();
        }
    }

    async fn release(&mut self, _force: bool) -> bool {
        true
    }
}

crate::extension_module!(DirectoryHistory);
