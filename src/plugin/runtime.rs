//! Extension host
//!
//! Owns the loaded modules, their API compatibility check and the in-call
//! counter the shutdown coordinator reads before unloading anything.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::plugin::builtin::api::discover_builtin_extensions;
use crate::plugin::error::{ExtensionError, ExtensionResult};
use crate::plugin::traits::{
    major_version, ExtensionModule, ExtensionSettingsSink, PluginRuntime, UnloadPrompt,
};
use crate::shutdown::guards::GuardState;
use crate::shutdown::types::UiParent;

struct LoadedExtension {
    name: String,
    module: Box<dyn ExtensionModule>,
}

pub struct PluginHost {
    modules: Mutex<Vec<LoadedExtension>>,
    loaded: AtomicUsize,
    unloading: AtomicBool,
    api_version: u32,
    guards: Arc<GuardState>,
    prompt: Option<Arc<dyn UnloadPrompt>>,
    settings_sink: Option<Arc<dyn ExtensionSettingsSink>>,
}

impl PluginHost {
    pub fn new(api_version: u32, guards: Arc<GuardState>) -> Self {
        Self {
            modules: Mutex::new(Vec::new()),
            loaded: AtomicUsize::new(0),
            unloading: AtomicBool::new(false),
            api_version,
            guards,
            prompt: None,
            settings_sink: None,
        }
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn UnloadPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_settings_sink(mut self, sink: Arc<dyn ExtensionSettingsSink>) -> Self {
        self.settings_sink = Some(sink);
        self
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub async fn load(&self, module: Box<dyn ExtensionModule>) -> ExtensionResult<()> {
        let info = module.info();
        if self.unloading.load(Ordering::Acquire) {
            return Err(ExtensionError::Unloading { name: info.name });
        }
        if !module.is_compatible(self.api_version) {
            return Err(ExtensionError::Incompatible {
                name: info.name,
                found: info.api_version,
                expected_major: major_version(self.api_version),
            });
        }

        let mut modules = self.modules.lock().await;
        if modules.iter().any(|loaded| loaded.name == info.name) {
            return Err(ExtensionError::Duplicate { name: info.name });
        }
        log::debug!("Loaded extension '{}' {}", info.name, info.version);
        modules.push(LoadedExtension {
            name: info.name,
            module,
        });
        self.loaded.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Load every registered builtin module; incompatible ones are skipped
    ///
    /// `sections` holds persisted configuration keyed by extension name.
    pub async fn load_builtin(&self, sections: &BTreeMap<String, toml::Table>) -> usize {
        let mut loaded = 0;
        for mut module in discover_builtin_extensions() {
            if let Some(section) = sections.get(&module.info().name) {
                module.restore_configuration(section);
            }
            match self.load(module).await {
                Ok(()) => loaded += 1,
                Err(e) => log::warn!("Skipping builtin extension: {}", e),
            }
        }
        loaded
    }

    /// Run `call` against a loaded module, counted as an in-flight extension call
    pub async fn call<R>(
        &self,
        name: &str,
        call: impl FnOnce(&mut dyn ExtensionModule) -> R,
    ) -> ExtensionResult<R> {
        let _in_call = self.guards.enter_plugin_call();
        let mut modules = self.modules.lock().await;
        let loaded = modules
            .iter_mut()
            .find(|loaded| loaded.name == name)
            .ok_or_else(|| ExtensionError::NotFound {
                name: name.to_string(),
            })?;
        Ok(call(loaded.module.as_mut()))
    }

    pub async fn loaded_names(&self) -> Vec<String> {
        self.modules
            .lock()
            .await
            .iter()
            .map(|loaded| loaded.name.clone())
            .collect()
    }

    async fn confirm_force(&self, parent: UiParent, name: &str) -> bool {
        match &self.prompt {
            Some(prompt) => prompt.confirm_force_unload(parent, name).await,
            None => false,
        }
    }
}

#[async_trait]
impl PluginRuntime for PluginHost {
    fn loaded_count(&self) -> usize {
        self.loaded.load(Ordering::Acquire)
    }

    async fn can_unload_all(&self) -> bool {
        let modules = self.modules.lock().await;
        match modules.iter().find(|loaded| !loaded.module.can_release()) {
            Some(blocking) => {
                log::info!("Extension '{}' cannot be unloaded now", blocking.name);
                false
            }
            None => true,
        }
    }

    async fn try_unload_all(&self, parent: UiParent, force: bool) -> bool {
        self.unloading.store(true, Ordering::Release);
        let mut modules = self.modules.lock().await;

        // newest first
        while let Some(loaded) = modules.last_mut() {
            if let (Some(sink), Some(section)) = (&self.settings_sink, loaded.module.configuration())
            {
                sink.store_section(&loaded.name, section);
            }

            let mut released = loaded.module.release(force).await;
            if !released && force {
                log::warn!("Extension '{}' refused to unload; unloading anyway", loaded.name);
                released = true;
            }
            if !released && self.confirm_force(parent, &loaded.name).await {
                if !loaded.module.release(true).await {
                    log::warn!("Extension '{}' still refused; forced out", loaded.name);
                }
                released = true;
            }
            if !released {
                log::info!("Extension '{}' refused to unload", loaded.name);
                self.unloading.store(false, Ordering::Release);
                return false;
            }

            if let Some(unloaded) = modules.pop() {
                log::debug!("Unloaded extension '{}'", unloaded.name);
            }
            self.loaded.fetch_sub(1, Ordering::AcqRel);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::traits::ExtensionInfo;
    use std::sync::Mutex as StdMutex;

    const HOST_API: u32 = 20261018;

    struct Stubborn {
        name: &'static str,
        api_version: u32,
        refuses: bool,
    }

    impl Stubborn {
        fn new(name: &'static str, refuses: bool) -> Box<Self> {
            Box::new(Self {
                name,
                api_version: HOST_API,
                refuses,
            })
        }
    }

    #[async_trait]
    impl ExtensionModule for Stubborn {
        fn info(&self) -> ExtensionInfo {
            ExtensionInfo {
                name: self.name.to_string(),
                version: "0.1.0".to_string(),
                api_version: self.api_version,
            }
        }

        fn configuration(&self) -> Option<toml::Table> {
            let mut table = toml::Table::new();
            table.insert("refuses".to_string(), toml::Value::Boolean(self.refuses));
            Some(table)
        }

        fn can_release(&self) -> bool {
            !self.refuses
        }

        async fn release(&mut self, force: bool) -> bool {
            force || !self.refuses
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sections: StdMutex<BTreeMap<String, toml::Table>>,
    }

    impl ExtensionSettingsSink for RecordingSink {
        fn store_section(&self, extension: &str, section: toml::Table) {
            self.sections
                .lock()
                .unwrap()
                .insert(extension.to_string(), section);
        }
    }

    struct AnswerPrompt(bool);

    #[async_trait]
    impl UnloadPrompt for AnswerPrompt {
        async fn confirm_force_unload(&self, _parent: UiParent, _extension: &str) -> bool {
            self.0
        }
    }

    fn host() -> PluginHost {
        PluginHost::new(HOST_API, Arc::new(GuardState::ready()))
    }

    #[tokio::test]
    async fn test_incompatible_and_duplicate_modules_rejected() {
        let host = host();
        host.load(Stubborn::new("ftp", false)).await.unwrap();
        assert_eq!(
            host.load(Stubborn::new("ftp", false)).await,
            Err(ExtensionError::Duplicate {
                name: "ftp".to_string()
            })
        );

        let old = Box::new(Stubborn {
            name: "legacy",
            api_version: 20240101,
            refuses: false,
        });
        assert!(matches!(
            host.load(old).await,
            Err(ExtensionError::Incompatible {
                expected_major: 2026,
                ..
            })
        ));
        assert_eq!(host.loaded_count(), 1);
    }

    #[tokio::test]
    async fn test_unload_saves_configuration() {
        let sink = Arc::new(RecordingSink::default());
        let host = host().with_settings_sink(sink.clone());
        host.load(Stubborn::new("ftp", false)).await.unwrap();
        host.load(Stubborn::new("archive", false)).await.unwrap();

        assert!(host.try_unload_all(UiParent::MainWindow, false).await);
        assert_eq!(host.loaded_count(), 0);
        let sections = sink.sections.lock().unwrap();
        assert!(sections.contains_key("ftp"));
        assert!(sections.contains_key("archive"));
    }

    #[tokio::test]
    async fn test_refusal_stops_unload_and_allows_loading_again() {
        let host = host().with_prompt(Arc::new(AnswerPrompt(false)));
        host.load(Stubborn::new("ftp", true)).await.unwrap();
        host.load(Stubborn::new("archive", false)).await.unwrap();

        assert!(!host.can_unload_all().await);
        assert!(!host.try_unload_all(UiParent::ShutdownProgress, false).await);
        assert_eq!(host.loaded_names().await, vec!["ftp".to_string()]);
        host.load(Stubborn::new("viewer", false)).await.unwrap();
    }

    #[tokio::test]
    async fn test_user_may_force_refusing_module() {
        let host = host().with_prompt(Arc::new(AnswerPrompt(true)));
        host.load(Stubborn::new("ftp", true)).await.unwrap();
        assert!(host.try_unload_all(UiParent::MainWindow, false).await);
        assert_eq!(host.loaded_count(), 0);
    }

    #[tokio::test]
    async fn test_force_ignores_refusal_and_blocks_new_loads() {
        let host = host();
        host.load(Stubborn::new("ftp", true)).await.unwrap();
        assert!(host.try_unload_all(UiParent::ShutdownProgress, true).await);
        assert!(matches!(
            host.load(Stubborn::new("late", false)).await,
            Err(ExtensionError::Unloading { .. })
        ));
    }

    #[tokio::test]
    async fn test_builtin_modules_restore_sections() {
        let host = PluginHost::new(
            crate::core::version::extension_api_version(),
            Arc::new(GuardState::ready()),
        );
        let mut section = toml::Table::new();
        section.insert(
            "recent".to_string(),
            toml::Value::Array(vec!["/srv".into()]),
        );
        let mut sections = BTreeMap::new();
        sections.insert("directory-history".to_string(), section);

        assert!(host.load_builtin(&sections).await >= 1);
        let restored = host
            .call("directory-history", |module| module.configuration())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            restored.get("recent").and_then(|v| v.as_array()).map(|a| a.len()),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_call_counts_as_plugin_call() {
        let guards = Arc::new(GuardState::ready());
        let host = PluginHost::new(HOST_API, guards.clone());
        host.load(Stubborn::new("ftp", false)).await.unwrap();

        let inside = host
            .call("ftp", |_module| guards.snapshot().plugin_calls)
            .await
            .unwrap();
        assert_eq!(inside, 1);
        assert_eq!(guards.snapshot().plugin_calls, 0);
        assert!(host.call("nope", |_| ()).await.is_err());
    }
}
