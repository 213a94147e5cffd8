//! Process-wide close guards
//!
//! Each flag is written only by the subsystem that owns it; the coordinator
//! reads a snapshot during validation and never changes them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::shutdown::error::GuardKind;
use crate::shutdown::types::ShutdownKind;

#[derive(Debug, Default)]
pub struct GuardState {
    can_close: AtomicBool,
    can_close_but_in_end_suspend: AtomicBool,
    busy: AtomicBool,
    plugin_calls: AtomicUsize,
}

/// Point-in-time copy of the guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuardSnapshot {
    pub can_close: bool,
    pub can_close_but_in_end_suspend: bool,
    pub busy: bool,
    pub plugin_calls: usize,
}

impl GuardSnapshot {
    /// Guards that forbid closing for this kind, in reporting order
    ///
    /// A cleared `can_close` is tolerated for session triggers while the host
    /// reports it is suspended at end of session.
    pub fn failures(&self, kind: ShutdownKind) -> Vec<GuardKind> {
        let mut failures = Vec::new();
        let suspended_exception = kind.is_session_trigger() && self.can_close_but_in_end_suspend;
        if !self.can_close && !suspended_exception {
            failures.push(GuardKind::CanClose);
        }
        if self.busy {
            failures.push(GuardKind::Busy);
        }
        if self.plugin_calls > 0 {
            failures.push(GuardKind::InsidePluginCall);
        }
        failures
    }
}

impl GuardState {
    /// Guards for a process that is still starting up
    pub fn new() -> Self {
        Self::default()
    }

    /// Guards for a fully started process
    pub fn ready() -> Self {
        let state = Self::default();
        state.set_can_close(true);
        state
    }

    pub fn set_can_close(&self, value: bool) {
        self.can_close.store(value, Ordering::Release);
    }

    pub fn set_end_suspend(&self, value: bool) {
        self.can_close_but_in_end_suspend
            .store(value, Ordering::Release);
    }

    /// Mark the application busy until the returned token is dropped
    ///
    /// Returns `None` when something else already holds the busy flag.
    pub fn try_mark_busy(self: &Arc<Self>) -> Option<BusyToken> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyToken {
                guards: Arc::clone(self),
            })
    }

    /// Count one extension call in flight until the returned token is dropped
    pub fn enter_plugin_call(self: &Arc<Self>) -> PluginCallToken {
        self.plugin_calls.fetch_add(1, Ordering::AcqRel);
        PluginCallToken {
            guards: Arc::clone(self),
        }
    }

    pub fn snapshot(&self) -> GuardSnapshot {
        GuardSnapshot {
            can_close: self.can_close.load(Ordering::Acquire),
            can_close_but_in_end_suspend: self
                .can_close_but_in_end_suspend
                .load(Ordering::Acquire),
            busy: self.busy.load(Ordering::Acquire),
            plugin_calls: self.plugin_calls.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug)]
pub struct BusyToken {
    guards: Arc<GuardState>,
}

impl Drop for BusyToken {
    fn drop(&mut self) {
        self.guards.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
pub struct PluginCallToken {
    guards: Arc<GuardState>,
}

impl Drop for PluginCallToken {
    fn drop(&mut self) {
        self.guards.plugin_calls.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_cannot_close() {
        let guards = GuardState::new();
        assert_eq!(
            guards.snapshot().failures(ShutdownKind::UserClose),
            vec![GuardKind::CanClose]
        );
        assert!(GuardState::ready()
            .snapshot()
            .failures(ShutdownKind::UserClose)
            .is_empty());
    }

    #[test]
    fn test_end_suspend_exception_only_for_session_triggers() {
        let guards = GuardState::new();
        guards.set_end_suspend(true);
        let snapshot = guards.snapshot();

        assert!(snapshot.failures(ShutdownKind::SessionEnd).is_empty());
        assert!(snapshot.failures(ShutdownKind::SessionQuery).is_empty());
        assert_eq!(
            snapshot.failures(ShutdownKind::UserClose),
            vec![GuardKind::CanClose]
        );
    }

    #[test]
    fn test_busy_token_is_exclusive_and_released_on_drop() {
        let guards = Arc::new(GuardState::ready());
        let token = guards.try_mark_busy().expect("first busy mark");
        assert!(guards.try_mark_busy().is_none());
        assert_eq!(
            guards.snapshot().failures(ShutdownKind::ForcedClose),
            vec![GuardKind::Busy]
        );

        drop(token);
        assert!(!guards.snapshot().busy);
    }

    #[test]
    fn test_plugin_calls_nest() {
        let guards = Arc::new(GuardState::ready());
        let outer = guards.enter_plugin_call();
        let inner = guards.enter_plugin_call();
        assert_eq!(guards.snapshot().plugin_calls, 2);

        drop(inner);
        assert_eq!(
            guards.snapshot().failures(ShutdownKind::SessionEnd),
            vec![GuardKind::InsidePluginCall]
        );
        drop(outer);
        assert_eq!(guards.snapshot().plugin_calls, 0);
    }
}
