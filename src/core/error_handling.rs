//! Error reporting helpers
//!
//! Errors that reach the top of the binary are logged once, either with a
//! message the user can act on (a bad configuration value) or with a generic
//! context line plus debug detail (an I/O failure deep inside the store).

/// Errors that know whether their message is meant for the user
///
/// When `is_user_actionable()` returns `true`, `user_message()` must return
/// `Some(message)`; otherwise it returns `None`.
pub trait ContextualError: std::error::Error {
    /// True when the error carries a specific message the user can act on
    fn is_user_actionable(&self) -> bool;

    /// The user-facing message for actionable errors
    fn user_message(&self) -> Option<&str>;
}

/// Log a fatal error with the appropriate level of detail
///
/// # Examples
/// ```rust,no_run
/// # use endsession::core::error_handling::log_error_with_context;
/// # use endsession::config::ConfigError;
/// let err = ConfigError::InvalidSetting {
///     key: "shutdown.safety_margin_ms".to_string(),
///     message: "must be smaller than critical_budget_ms".to_string(),
/// };
/// log_error_with_context(&err, "Loading settings");
/// ```
pub fn log_error_with_context<E: ContextualError + std::fmt::Debug>(
    error: &E,
    operation_context: &str,
) {
    match error.user_message().filter(|_| error.is_user_actionable()) {
        Some(user_msg) => log::error!("FATAL: {}", user_msg),
        None => log::error!("FATAL: {}", operation_context),
    }
    log::debug!("DETAIL: {}", error);
    log::debug!("DEBUG_DETAILS: {:?}", error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct BadValue {
        message: String,
    }

    impl fmt::Display for BadValue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl std::error::Error for BadValue {}

    impl ContextualError for BadValue {
        fn is_user_actionable(&self) -> bool {
            true
        }

        fn user_message(&self) -> Option<&str> {
            Some(&self.message)
        }
    }

    #[derive(Debug)]
    struct DiskFailure;

    impl fmt::Display for DiskFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "device not ready")
        }
    }

    impl std::error::Error for DiskFailure {}

    impl ContextualError for DiskFailure {
        fn is_user_actionable(&self) -> bool {
            false
        }

        fn user_message(&self) -> Option<&str> {
            None
        }
    }

    #[test]
    fn test_user_actionable_error_exposes_message() {
        let error = BadValue {
            message: "confirm_on_close must be a boolean".to_string(),
        };
        assert!(error.is_user_actionable());
        assert_eq!(error.user_message(), Some("confirm_on_close must be a boolean"));
        log_error_with_context(&error, "Loading settings");
    }

    #[test]
    fn test_system_error_has_no_user_message() {
        let error = DiskFailure;
        assert!(!error.is_user_actionable());
        assert_eq!(error.user_message(), None);
        log_error_with_context(&error, "Restoring configuration");
    }
}
