//! Startup recovery of the configuration tree
//!
//! Runs once, before settings are loaded. A tree still carrying the
//! save-in-progress marker was being written when the process died; if a
//! verified backup exists it replaces the tree, otherwise nothing is touched.
//! Promotion is two renames, so the marker is flagged `RestoreInProgress`
//! first and a restore cut short is finished on the next start.

use std::path::{Path, PathBuf};

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::marker::{BackupMarker, BackupState};
use crate::config::tree::{hash_tree, remove_tree, StoreLayout};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Nothing to do
    Clean,
    /// The last shutdown saved cleanly; its backup was discarded
    ConsumedBackup,
    /// A backup without a completion marker (or failing verification) was deleted
    RemovedIncompleteBackup,
    /// The interrupted tree was moved aside and the backup promoted
    Restored { corrupted_copy: PathBuf },
    /// The tree was interrupted mid-save and no verified backup exists
    Unrecoverable,
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Whether the backup directory matches the hashes recorded in its marker
async fn backup_verifies(layout: &StoreLayout, marker: &BackupMarker) -> bool {
    let trusted = matches!(
        marker.state,
        BackupState::BackupComplete | BackupState::RestoreInProgress
    );
    if !trusted || !exists(&layout.backup).await {
        return false;
    }
    match hash_tree(&layout.backup).await {
        Ok(hashes) => hashes == marker.files,
        Err(e) => {
            log::warn!("Could not verify configuration backup: {}", e);
            false
        }
    }
}

/// Move the interrupted tree aside (if still there) and rename the backup into place
async fn promote_backup(
    layout: &StoreLayout,
    marker: &BackupMarker,
) -> ConfigResult<RecoveryOutcome> {
    if marker.state != BackupState::RestoreInProgress {
        marker.restoring().write(&layout.marker).await?;
    }

    if exists(&layout.root).await {
        remove_tree(&layout.corrupted).await?;
        tokio::fs::rename(&layout.root, &layout.corrupted)
            .await
            .map_err(|e| ConfigError::io("move aside", &layout.root, e))?;
    }
    tokio::fs::rename(&layout.backup, &layout.root)
        .await
        .map_err(|e| ConfigError::io("restore", &layout.backup, e))?;
    BackupMarker::clear(&layout.marker).await?;

    log::warn!(
        "Restored configuration from backup; interrupted copy kept at {}",
        layout.corrupted.display()
    );
    Ok(RecoveryOutcome::Restored {
        corrupted_copy: layout.corrupted.clone(),
    })
}

/// Pick up a promotion that was killed part way through
async fn finish_restore(
    layout: &StoreLayout,
    marker: &BackupMarker,
) -> ConfigResult<RecoveryOutcome> {
    if !exists(&layout.backup).await {
        // both renames happened; only the marker was left behind
        BackupMarker::clear(&layout.marker).await?;
        log::info!("Completed configuration restore from the previous start");
        return Ok(RecoveryOutcome::Restored {
            corrupted_copy: layout.corrupted.clone(),
        });
    }
    if backup_verifies(layout, marker).await {
        log::warn!("Resuming configuration restore interrupted on the previous start");
        return promote_backup(layout, marker).await;
    }

    log::error!(
        "Configuration backup {} no longer verifies; restore abandoned",
        layout.backup.display()
    );
    remove_tree(&layout.backup).await?;
    BackupMarker::clear(&layout.marker).await?;
    Ok(RecoveryOutcome::Unrecoverable)
}

pub async fn restore_from_backup_if_needed(root: &Path) -> ConfigResult<RecoveryOutcome> {
    let layout = StoreLayout::new(root);
    let marker = match BackupMarker::read(&layout.marker).await {
        Ok(marker) => marker,
        Err(ConfigError::Parse { path, message }) => {
            log::warn!("Unreadable backup marker {}: {}", path.display(), message);
            BackupMarker::in_progress()
        }
        Err(e) => return Err(e),
    };
    if marker.state == BackupState::RestoreInProgress {
        return finish_restore(&layout, &marker).await;
    }

    let backup_present = exists(&layout.backup).await;
    let backup_ok = backup_verifies(&layout, &marker).await;
    // a verified backup with no tree beside it is a restore that lost its marker
    let interrupted =
        exists(&layout.save_marker()).await || (backup_ok && !exists(&layout.root).await);

    if backup_present && !backup_ok {
        log::warn!(
            "Deleting incomplete configuration backup {}",
            layout.backup.display()
        );
        remove_tree(&layout.backup).await?;
        BackupMarker::clear(&layout.marker).await?;
        if interrupted {
            log::error!(
                "Configuration at {} was interrupted mid-save and has no usable backup",
                layout.root.display()
            );
            return Ok(RecoveryOutcome::Unrecoverable);
        }
        return Ok(RecoveryOutcome::RemovedIncompleteBackup);
    }

    if !interrupted {
        if backup_ok {
            remove_tree(&layout.backup).await?;
            BackupMarker::clear(&layout.marker).await?;
            log::debug!("Discarded configuration backup from last shutdown");
            return Ok(RecoveryOutcome::ConsumedBackup);
        }
        BackupMarker::clear(&layout.marker).await?;
        return Ok(RecoveryOutcome::Clean);
    }

    if !backup_ok {
        log::error!(
            "Configuration at {} was interrupted mid-save and has no backup",
            layout.root.display()
        );
        return Ok(RecoveryOutcome::Unrecoverable);
    }

    promote_backup(&layout, &marker).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{AppSettings, SETTINGS_FILE};
    use crate::config::store::{ConfigurationStore, FileConfigStore};

    async fn saved_store(dir: &Path, auto_save: bool) -> FileConfigStore {
        let settings = AppSettings {
            auto_save,
            ..AppSettings::default()
        };
        let store = FileConfigStore::new(dir.join("Endsession"), settings.shared());
        assert!(store.save().await);
        store
    }

    #[tokio::test]
    async fn test_clean_tree_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path(), true).await;
        assert_eq!(
            restore_from_backup_if_needed(store.root()).await.unwrap(),
            RecoveryOutcome::Clean
        );
    }

    #[tokio::test]
    async fn test_clean_save_consumes_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path(), true).await;
        assert!(store.backup_current().await);
        assert!(store.save().await);

        assert_eq!(
            restore_from_backup_if_needed(store.root()).await.unwrap(),
            RecoveryOutcome::ConsumedBackup
        );
        assert!(!store.layout().backup.exists());
        assert!(!store.layout().marker.exists());
    }

    #[tokio::test]
    async fn test_interrupted_save_restores_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path(), false).await;
        assert!(store.backup_current().await);

        // simulate a kill halfway through the next save
        tokio::fs::write(store.layout().save_marker(), "").await.unwrap();
        tokio::fs::write(store.root().join(SETTINGS_FILE), "auto_save = tr")
            .await
            .unwrap();

        let outcome = restore_from_backup_if_needed(store.root()).await.unwrap();
        let corrupted = store.layout().corrupted.clone();
        assert_eq!(
            outcome,
            RecoveryOutcome::Restored {
                corrupted_copy: corrupted.clone()
            }
        );
        let restored = AppSettings::load(store.root()).await.unwrap();
        assert!(!restored.auto_save);
        assert!(corrupted.join(SETTINGS_FILE).exists());
        assert!(!store.layout().save_marker().exists());
    }

    #[tokio::test]
    async fn test_incomplete_backup_is_deleted_and_data_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path(), true).await;
        tokio::fs::create_dir_all(&store.layout().backup).await.unwrap();
        BackupMarker::in_progress()
            .write(&store.layout().marker)
            .await
            .unwrap();
        tokio::fs::write(store.layout().save_marker(), "").await.unwrap();

        assert_eq!(
            restore_from_backup_if_needed(store.root()).await.unwrap(),
            RecoveryOutcome::Unrecoverable
        );
        assert!(!store.layout().backup.exists());
        assert!(store.root().join(SETTINGS_FILE).exists());
        assert!(store.layout().save_marker().exists());
    }

    #[tokio::test]
    async fn test_tampered_backup_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path(), true).await;
        assert!(store.backup_current().await);
        tokio::fs::write(store.layout().backup.join(SETTINGS_FILE), "garbage")
            .await
            .unwrap();

        assert_eq!(
            restore_from_backup_if_needed(store.root()).await.unwrap(),
            RecoveryOutcome::RemovedIncompleteBackup
        );
    }
    #[tokio::test]
    async fn test_restore_cut_between_renames_is_finished() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path(), false).await;
        assert!(store.backup_current().await);
        let layout = store.layout().clone();

        // killed after the tree was moved aside but before the backup was promoted
        tokio::fs::write(layout.save_marker(), "").await.unwrap();
        let marker = BackupMarker::read(&layout.marker).await.unwrap();
        marker.restoring().write(&layout.marker).await.unwrap();
        tokio::fs::rename(&layout.root, &layout.corrupted).await.unwrap();

        let outcome = restore_from_backup_if_needed(&layout.root).await.unwrap();

        assert_eq!(
            outcome,
            RecoveryOutcome::Restored {
                corrupted_copy: layout.corrupted.clone()
            }
        );
        assert!(!AppSettings::load(&layout.root).await.unwrap().auto_save);
        assert!(!layout.backup.exists());
        assert!(!layout.marker.exists());
        assert!(layout.corrupted.join(SETTINGS_FILE).exists());
    }

    #[tokio::test]
    async fn test_missing_tree_beside_verified_backup_is_promoted() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path(), false).await;
        assert!(store.backup_current().await);
        let layout = store.layout().clone();
        tokio::fs::write(layout.save_marker(), "").await.unwrap();
        tokio::fs::rename(&layout.root, &layout.corrupted).await.unwrap();

        let outcome = restore_from_backup_if_needed(&layout.root).await.unwrap();

        assert!(matches!(outcome, RecoveryOutcome::Restored { .. }));
        assert!(layout.root.join(SETTINGS_FILE).exists());
        assert!(!layout.backup.exists());
    }

    #[tokio::test]
    async fn test_restore_marker_left_after_both_renames() {
        let dir = tempfile::tempdir().unwrap();
        let store = saved_store(dir.path(), true).await;
        assert!(store.backup_current().await);
        let layout = store.layout().clone();
        let marker = BackupMarker::read(&layout.marker).await.unwrap();
        marker.restoring().write(&layout.marker).await.unwrap();
        tokio::fs::rename(&layout.root, &layout.corrupted).await.unwrap();
        tokio::fs::rename(&layout.backup, &layout.root).await.unwrap();

        let outcome = restore_from_backup_if_needed(&layout.root).await.unwrap();

        assert!(matches!(outcome, RecoveryOutcome::Restored { .. }));
        assert!(layout.root.join(SETTINGS_FILE).exists());
        assert!(!layout.marker.exists());
    }
}
