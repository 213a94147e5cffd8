//! Lock poisoning helpers
//!
//! Collaborators share small pieces of state behind `std::sync` locks (close
//! query states, job tables, settings). A poisoned lock means some task panicked
//! while holding it; these helpers turn that into a domain error so callers can
//! degrade instead of unwinding through the coordinator.

use std::sync::{LockResult, MutexGuard, RwLockReadGuard, RwLockWriteGuard};

fn poison_message(lock_kind: &str, detail: impl std::fmt::Debug) -> String {
    format!(
        "Internal synchronisation error ({} poisoned by a panicking holder): {:?}",
        lock_kind, detail
    )
}

/// Convert a poisoned `Mutex::lock()` result into an application error
///
/// # Examples
/// ```
/// use std::sync::Mutex;
/// use endsession::core::sync::handle_mutex_poison;
/// use endsession::config::ConfigError;
///
/// let table = Mutex::new(vec![1, 2, 3]);
/// let guard = handle_mutex_poison(table.lock(), |message| ConfigError::Lock { message }).unwrap();
/// assert_eq!(guard.len(), 3);
/// ```
pub fn handle_mutex_poison<T, E>(
    result: LockResult<T>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<T, E> {
    result.map_err(|poison_err| error_constructor(poison_message("mutex", poison_err)))
}

/// Same as [`handle_mutex_poison`] but recovers the guard instead of failing
///
/// Used for plain bookkeeping state where a half-updated value is still
/// better than refusing to answer, e.g. a session's close query state.
pub fn recover_mutex_poison<'a, T>(
    result: LockResult<MutexGuard<'a, T>>,
    context: &str,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(|poison_err| {
        log::warn!("{}: recovering from poisoned lock", context);
        poison_err.into_inner()
    })
}

/// Convert a poisoned `RwLock::read()` result into an application error
pub fn handle_rwlock_read<T, E>(
    result: LockResult<RwLockReadGuard<T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockReadGuard<T>, E> {
    result.map_err(|poison_err| error_constructor(poison_message("RwLock read", poison_err)))
}

/// Convert a poisoned `RwLock::write()` result into an application error
pub fn handle_rwlock_write<T, E>(
    result: LockResult<RwLockWriteGuard<T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockWriteGuard<T>, E> {
    result.map_err(|poison_err| error_constructor(poison_message("RwLock write", poison_err)))
}
