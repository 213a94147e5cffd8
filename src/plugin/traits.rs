//! Extension module and runtime traits

use async_trait::async_trait;

use crate::shutdown::types::UiParent;

/// Major API version (the year) of a dated API version number
pub fn major_version(api_version: u32) -> u32 {
    api_version / 10000
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub name: String,
    pub version: String,
    pub api_version: u32,
}

/// A loadable extension module
#[async_trait]
pub trait ExtensionModule: Send + Sync {
    fn info(&self) -> ExtensionInfo;

    /// Modules built against another major API version are not loaded
    fn is_compatible(&self, host_api_version: u32) -> bool {
        major_version(self.info().api_version) == major_version(host_api_version)
    }

    /// Configuration to persist before the module goes away
    fn configuration(&self) -> Option<toml::Table> {
        None
    }

    /// Apply a previously persisted section
    fn restore_configuration(&mut self, _section: &toml::Table) {}

    /// Whether `release(false)` would currently succeed
    fn can_release(&self) -> bool {
        true
    }

    /// Release all module resources; may refuse unless `force`
    async fn release(&mut self, force: bool) -> bool;
}

/// Where extension configuration goes before a module is unloaded
pub trait ExtensionSettingsSink: Send + Sync {
    fn store_section(&self, extension: &str, section: toml::Table);
}

/// Asks the user whether a module that refused to unload may be forced
#[async_trait]
pub trait UnloadPrompt: Send + Sync {
    async fn confirm_force_unload(&self, parent: UiParent, extension: &str) -> bool;
}

/// The loaded-extension runtime as seen by the shutdown coordinator
#[async_trait]
pub trait PluginRuntime: Send + Sync {
    fn loaded_count(&self) -> usize;

    /// Probe every module without unloading anything
    async fn can_unload_all(&self) -> bool;

    /// Save each module's configuration and unload it
    ///
    /// Returns false when a module refused and stayed loaded. With `force`
    /// refusals are ignored.
    async fn try_unload_all(&self, parent: UiParent, force: bool) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dated(u32);

    #[async_trait]
    impl ExtensionModule for Dated {
        fn info(&self) -> ExtensionInfo {
            ExtensionInfo {
                name: "dated".to_string(),
                version: "1.0.0".to_string(),
                api_version: self.0,
            }
        }

        async fn release(&mut self, _force: bool) -> bool {
            true
        }
    }

    #[test]
    fn test_major_version_is_year() {
        assert_eq!(major_version(20261018), 2026);
        assert_eq!(major_version(20250101), 2025);
    }

    #[test]
    fn test_default_compatibility_matches_year() {
        assert!(Dated(20260101).is_compatible(20261018));
        assert!(!Dated(20251231).is_compatible(20261018));
    }
}
