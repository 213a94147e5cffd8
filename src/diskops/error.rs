use std::path::PathBuf;
use thiserror::Error;

use crate::core::error_handling::ContextualError;

pub type DiskJobResult<T> = Result<T, DiskJobError>;

#[derive(Error, Debug)]
pub enum DiskJobError {
    #[error("job canceled after {completed} of {total} files")]
    Canceled { completed: usize, total: usize },

    #[error("failed to {action} '{path}': {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("source '{path}' does not exist")]
    MissingSource { path: PathBuf },

    #[error("job table lock error: {message}")]
    Lock { message: String },
}

impl DiskJobError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DiskJobError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, DiskJobError::Canceled { .. })
    }
}

impl ContextualError for DiskJobError {
    fn is_user_actionable(&self) -> bool {
        matches!(self, DiskJobError::MissingSource { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            DiskJobError::MissingSource { .. } => Some("The source file or directory no longer exists"),
            _ => None,
        }
    }
}
