//! Shutdown error taxonomy
//!
//! Under a negotiated shutdown any of these ends the run in `Rejected`; under a
//! critical shutdown they are recorded as degradations and the run continues.

use std::time::Duration;
use strum_macros::Display;
use thiserror::Error;

use crate::core::error_handling::ContextualError;
use crate::shutdown::types::Policy;

/// Process-wide guard that can forbid closing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum GuardKind {
    /// Startup has not finished (or the host cleared the flag)
    #[strum(serialize = "can-close")]
    CanClose,
    /// A modal operation holds the application busy
    #[strum(serialize = "busy")]
    Busy,
    /// Execution is currently inside an extension module call
    #[strum(serialize = "inside-plugin-call")]
    InsidePluginCall,
}

impl GuardKind {
    pub fn description(self) -> &'static str {
        match self {
            GuardKind::CanClose => "The application is not ready to close yet",
            GuardKind::Busy => "The application is busy; finish the current operation first",
            GuardKind::InsidePluginCall => "An extension is running; wait for it to return",
        }
    }
}

/// Which persistence step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PersistStage {
    #[strum(serialize = "backup")]
    Backup,
    #[strum(serialize = "save")]
    Save,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("user declined: {prompt}")]
    UserDeclined { prompt: String },

    #[error("guard '{guard}' prevents closing")]
    ResourceBusy { guard: GuardKind },

    #[error("'{participant}' vetoed the shutdown: {detail}")]
    ParticipantVetoed { participant: String, detail: String },

    #[error("'{operation}' did not finish within {waited:?}")]
    TimedOut { operation: String, waited: Duration },

    #[error("configuration {stage} failed: {reason}")]
    PersistenceFailure { stage: PersistStage, reason: String },
}

impl ShutdownError {
    pub(crate) fn vetoed(participant: impl Into<String>, detail: impl Into<String>) -> Self {
        ShutdownError::ParticipantVetoed {
            participant: participant.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn timed_out(operation: impl Into<String>, waited: Duration) -> Self {
        ShutdownError::TimedOut {
            operation: operation.into(),
            waited,
        }
    }

    /// Whether this error ends the run under the given policy
    ///
    /// Persistence failures never block: the process is closing either way and
    /// the next startup restores from the backup.
    pub fn blocks(&self, policy: Policy) -> bool {
        match self {
            ShutdownError::PersistenceFailure { .. } => false,
            _ => policy == Policy::Negotiated,
        }
    }
}

impl ContextualError for ShutdownError {
    fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            ShutdownError::UserDeclined { .. } | ShutdownError::ResourceBusy { .. }
        )
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            ShutdownError::UserDeclined { prompt } => Some(prompt),
            ShutdownError::ResourceBusy { guard } => Some(guard.description()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_failures_never_block() {
        let error = ShutdownError::PersistenceFailure {
            stage: PersistStage::Save,
            reason: "disk full".to_string(),
        };
        assert!(!error.blocks(Policy::Negotiated));
        assert!(!error.blocks(Policy::BestEffort));
    }

    #[test]
    fn test_vetoes_block_only_negotiated_runs() {
        let error = ShutdownError::vetoed("viewer 'notes.txt'", "refused");
        assert!(error.blocks(Policy::Negotiated));
        assert!(!error.blocks(Policy::BestEffort));
    }

    #[test]
    fn test_display_messages() {
        let busy = ShutdownError::ResourceBusy {
            guard: GuardKind::InsidePluginCall,
        };
        assert_eq!(busy.to_string(), "guard 'inside-plugin-call' prevents closing");

        let timed_out = ShutdownError::timed_out("disk jobs", Duration::from_millis(4300));
        assert_eq!(timed_out.to_string(), "'disk jobs' did not finish within 4.3s");
    }

    #[test]
    fn test_user_actionable_errors_carry_messages() {
        let declined = ShutdownError::UserDeclined {
            prompt: "Close the application?".to_string(),
        };
        assert!(declined.is_user_actionable());
        assert_eq!(declined.user_message(), Some("Close the application?"));

        let busy = ShutdownError::ResourceBusy {
            guard: GuardKind::Busy,
        };
        assert_eq!(busy.user_message(), Some(GuardKind::Busy.description()));

        let vetoed = ShutdownError::vetoed("extensions", "refused to unload");
        assert!(!vetoed.is_user_actionable());
        assert_eq!(vetoed.user_message(), None);
    }
}
