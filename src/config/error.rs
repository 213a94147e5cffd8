use std::path::PathBuf;
use thiserror::Error;

use crate::core::error_handling::ContextualError;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid setting '{key}': {message}")]
    InvalidSetting { key: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to serialize settings: {message}")]
    Serialize { message: String },

    #[error("failed to {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup of '{path}' does not match its source")]
    BackupMismatch { path: PathBuf },

    #[error("'{path}' was left mid-save and cannot be backed up")]
    Indeterminate { path: PathBuf },

    #[error("no configuration directory available on this platform")]
    NoConfigDir,

    #[error("settings lock error: {message}")]
    Lock { message: String },
}

impl ConfigError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

impl ContextualError for ConfigError {
    fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            ConfigError::InvalidSetting { .. } | ConfigError::Parse { .. } | ConfigError::NoConfigDir
        )
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            ConfigError::InvalidSetting { message, .. } => Some(message),
            ConfigError::Parse { message, .. } => Some(message),
            ConfigError::NoConfigDir => Some("Use --config-dir to choose where settings are kept"),
            _ => None,
        }
    }
}
