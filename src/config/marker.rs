//! Persisted backup state marker
//!
//! The marker sits next to the backup directory. `BackupComplete` is written
//! only after the copy was hashed and compared with its source; the manifest
//! lets startup re-verify the copy before trusting it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use strum_macros::Display;

use crate::config::error::{ConfigError, ConfigResult};
use crate::config::tree::write_atomic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum BackupState {
    Clean,
    BackupInProgress,
    BackupComplete,
    /// The verified backup is being promoted over the interrupted tree
    RestoreInProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMarker {
    pub state: BackupState,
    /// RFC 3339 timestamp of the last state change
    pub updated: String,
    /// SHA-256 per relative file path; filled once complete
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

impl BackupMarker {
    pub fn in_progress() -> Self {
        Self {
            state: BackupState::BackupInProgress,
            updated: chrono::Utc::now().to_rfc3339(),
            files: BTreeMap::new(),
        }
    }

    pub fn complete(files: BTreeMap<String, String>) -> Self {
        Self {
            state: BackupState::BackupComplete,
            updated: chrono::Utc::now().to_rfc3339(),
            files,
        }
    }

    /// The same manifest, flagged as mid-restore
    pub fn restoring(&self) -> Self {
        Self {
            state: BackupState::RestoreInProgress,
            updated: chrono::Utc::now().to_rfc3339(),
            files: self.files.clone(),
        }
    }

    /// Read the marker; a missing file means `Clean`
    pub async fn read(path: &Path) -> ConfigResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                state: BackupState::Clean,
                updated: String::new(),
                files: BTreeMap::new(),
            }),
            Err(e) => Err(ConfigError::io("read", path, e)),
        }
    }

    pub async fn write(&self, path: &Path) -> ConfigResult<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| ConfigError::Serialize {
            message: e.to_string(),
        })?;
        write_atomic(path, &json).await
    }

    pub async fn clear(path: &Path) -> ConfigResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigError::io("remove", path, e)),
        }
    }
}
