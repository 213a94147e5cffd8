//! Transactional configuration store
//!
//! Layout on disk, for a root `<dir>/Endsession`:
//!
//! ```text
//! Endsession/                 settings.toml, extensions/<name>.toml
//! Endsession/.save-in-progress    present only while a save is being written
//! Endsession.backup/          verified copy taken before a risky save
//! Endsession.backup-state     BackupMarker (JSON)
//! Endsession.corrupted/       tree replaced by a restore
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::marker::BackupMarker;
use crate::config::settings::{SharedSettings, SETTINGS_FILE};
use crate::config::tree::{copy_tree, hash_tree, remove_tree, write_atomic, StoreLayout};
use crate::core::sync::{handle_rwlock_read, recover_mutex_poison};
use crate::plugin::ExtensionSettingsSink;

const EXTENSIONS_DIR: &str = "extensions";

#[async_trait]
pub trait ConfigurationStore: Send + Sync {
    /// Copy the persisted tree aside and mark it complete once verified
    async fn backup_current(&self) -> bool;

    /// Write the current configuration
    async fn save(&self) -> bool;
}

/// Result of the last backup attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationBackup {
    pub source: PathBuf,
    pub backup: PathBuf,
    pub verified: bool,
}

pub struct FileConfigStore {
    layout: StoreLayout,
    settings: SharedSettings,
    extension_sections: Mutex<BTreeMap<String, toml::Table>>,
    last_backup: Mutex<Option<ConfigurationBackup>>,
}

impl FileConfigStore {
    pub fn new(root: impl Into<PathBuf>, settings: SharedSettings) -> Self {
        Self {
            layout: StoreLayout::new(root),
            settings,
            extension_sections: Mutex::new(BTreeMap::new()),
            last_backup: Mutex::new(None),
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    pub fn last_backup(&self) -> Option<ConfigurationBackup> {
        recover_mutex_poison(self.last_backup.lock(), "config store").clone()
    }

    /// Sections queued for the next save, by extension name
    pub fn extension_section(&self, name: &str) -> Option<toml::Table> {
        recover_mutex_poison(self.extension_sections.lock(), "config store")
            .get(name)
            .cloned()
    }

    /// Persisted extension sections, keyed by file stem
    pub async fn read_extension_sections(&self) -> BTreeMap<String, toml::Table> {
        let mut sections = BTreeMap::new();
        let dir = self.layout.root.join(EXTENSIONS_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return sections,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            match tokio::fs::read_to_string(&path)
                .await
                .map(|text| toml::from_str::<toml::Table>(&text)) {
                Ok(Ok(table)) => {
                    sections.insert(stem, table);
                }
                Ok(Err(e)) => log::warn!("Ignoring unreadable {}: {}", path.display(), e),
                Err(e) => log::warn!("Could not read {}: {}", path.display(), e),
            }
        }
        sections
    }

    pub async fn try_backup(&self) -> ConfigResult<ConfigurationBackup> {
        let layout = &self.layout;
        if tokio::fs::try_exists(layout.save_marker())
            .await
            .unwrap_or(false)
        {
            return Err(ConfigError::Indeterminate {
                path: layout.root.clone(),
            });
        }

        BackupMarker::clear(&layout.marker).await?;
        remove_tree(&layout.backup).await?;
        BackupMarker::in_progress().write(&layout.marker).await?;

        if tokio::fs::try_exists(&layout.root).await.unwrap_or(false) {
            let copied = copy_tree(&layout.root, &layout.backup).await?;
            log::debug!("Copied {} configuration files to {}", copied, layout.backup.display());
        } else {
            tokio::fs::create_dir_all(&layout.backup)
                .await
                .map_err(|e| ConfigError::io("create", &layout.backup, e))?;
        }

        let source_hashes = if tokio::fs::try_exists(&layout.root).await.unwrap_or(false) {
            hash_tree(&layout.root).await?
        } else {
            BTreeMap::new()
        };
        let backup_hashes = hash_tree(&layout.backup).await?;
        if source_hashes != backup_hashes {
            return Err(ConfigError::BackupMismatch {
                path: layout.backup.clone(),
            });
        }

        BackupMarker::complete(backup_hashes)
            .write(&layout.marker)
            .await?;
        Ok(ConfigurationBackup {
            source: layout.root.clone(),
            backup: layout.backup.clone(),
            verified: true,
        })
    }

    pub async fn try_save(&self) -> ConfigResult<()> {
        let settings = handle_rwlock_read(self.settings.read(), |message| ConfigError::Lock {
            message,
        })?
        .clone();
        let sections = recover_mutex_poison(self.extension_sections.lock(), "config store").clone();
        let root = &self.layout.root;
        let save_marker = self.layout.save_marker();

        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| ConfigError::io("create", root, e))?;
        tokio::fs::write(&save_marker, chrono::Utc::now().to_rfc3339())
            .await
            .map_err(|e| ConfigError::io("write", &save_marker, e))?;

        write_atomic(&root.join(SETTINGS_FILE), settings.to_toml_string()?.as_bytes()).await?;
        for (name, table) in &sections {
            let contents = toml::to_string_pretty(table).map_err(|e| ConfigError::Serialize {
                message: e.to_string(),
            })?;
            let path = root.join(EXTENSIONS_DIR).join(format!("{}.toml", file_stem(name)));
            write_atomic(&path, contents.as_bytes()).await?;
        }

        tokio::fs::remove_file(&save_marker)
            .await
            .map_err(|e| ConfigError::io("remove", &save_marker, e))?;
        log::debug!(
            "Saved settings and {} extension sections to {}",
            sections.len(),
            root.display()
        );
        Ok(())
    }
}

/// File-system safe name for an extension section
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ExtensionSettingsSink for FileConfigStore {
    fn store_section(&self, extension: &str, section: toml::Table) {
        recover_mutex_poison(self.extension_sections.lock(), "config store")
            .insert(extension.to_string(), section);
    }
}

#[async_trait]
impl ConfigurationStore for FileConfigStore {
    async fn backup_current(&self) -> bool {
        let result = self.try_backup().await;
        let verified = result.is_ok();
        match result {
            Ok(backup) => log::info!("Configuration backed up to {}", backup.backup.display()),
            Err(e) => log::warn!("Configuration backup failed: {}", e),
        }
        *recover_mutex_poison(self.last_backup.lock(), "config store") = Some(ConfigurationBackup {
            source: self.layout.root.clone(),
            backup: self.layout.backup.clone(),
            verified,
        });
        verified
    }

    async fn save(&self) -> bool {
        match self.try_save().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Saving configuration failed: {}", e);
                false
            }
        }
    }
}
