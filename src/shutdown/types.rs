//! Shutdown domain types
//!
//! Kinds, requests, votes, phases and the report produced by one coordinator run.

use std::time::Duration;
use strum_macros::{Display, EnumIter, EnumString};
use tokio::time::Instant;

use crate::shutdown::error::ShutdownError;

/// What asked the application to end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum ShutdownKind {
    /// The user closed the main window
    UserClose,
    /// Close requested programmatically; never asks for confirmation
    ForcedClose,
    /// The OS asks whether the session may end
    SessionQuery,
    /// The OS ends the session
    SessionEnd,
    /// The OS ends the session and will kill the process when the budget runs out
    CriticalSessionEnd,
}

/// How votes and failures are treated for a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Policy {
    /// Any participant may veto; the application stays open on rejection
    Negotiated,
    /// Votes are advisory; every phase runs and the process always terminates
    BestEffort,
}

impl ShutdownKind {
    pub fn is_critical(self) -> bool {
        self == ShutdownKind::CriticalSessionEnd
    }

    /// Single lookup consumed by every phase instead of re-deriving criticality
    pub fn policy(self) -> Policy {
        if self.is_critical() {
            Policy::BestEffort
        } else {
            Policy::Negotiated
        }
    }

    /// Session queries evaluate the phase sequence without destroying anything
    pub fn is_evaluation_only(self) -> bool {
        self == ShutdownKind::SessionQuery
    }

    /// OS-originated triggers
    pub fn is_session_trigger(self) -> bool {
        matches!(
            self,
            ShutdownKind::SessionQuery | ShutdownKind::SessionEnd | ShutdownKind::CriticalSessionEnd
        )
    }

    /// The host queue must keep draining during waits or the OS declares us hung
    pub fn pumps_events(self) -> bool {
        self.is_session_trigger()
    }

    /// Whether the "confirm on close" question applies
    pub fn asks_confirmation(self) -> bool {
        self == ShutdownKind::UserClose
    }
}

/// One trigger, captured once and never mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownRequest {
    kind: ShutdownKind,
    arrived_at: Instant,
    budget: Option<Duration>,
}

impl ShutdownRequest {
    /// Create a request stamped with the current monotonic time
    pub fn new(kind: ShutdownKind, budget: Option<Duration>) -> Self {
        Self::arrived_at(kind, Instant::now(), budget)
    }

    pub fn arrived_at(kind: ShutdownKind, arrived_at: Instant, budget: Option<Duration>) -> Self {
        Self {
            kind,
            arrived_at,
            budget,
        }
    }

    pub fn kind(&self) -> ShutdownKind {
        self.kind
    }

    pub fn arrival(&self) -> Instant {
        self.arrived_at
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }
}

/// External events the coordinator reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    UserCloseRequested,
    ForcedCloseRequested,
    QueryEndSession {
        critical: bool,
        remaining_budget_ms: Option<u64>,
    },
    EndSession {
        critical: bool,
        budget_ms: Option<u64>,
    },
    /// The OS reported that the announced session end did not happen
    EndSessionCanceled,
}

impl ShutdownTrigger {
    /// Map the trigger to the kind of shutdown it starts, if any
    pub fn kind(&self) -> Option<ShutdownKind> {
        match self {
            ShutdownTrigger::UserCloseRequested => Some(ShutdownKind::UserClose),
            ShutdownTrigger::ForcedCloseRequested => Some(ShutdownKind::ForcedClose),
            ShutdownTrigger::QueryEndSession { critical: true, .. }
            | ShutdownTrigger::EndSession { critical: true, .. } => {
                Some(ShutdownKind::CriticalSessionEnd)
            }
            ShutdownTrigger::QueryEndSession { critical: false, .. } => {
                Some(ShutdownKind::SessionQuery)
            }
            ShutdownTrigger::EndSession { critical: false, .. } => Some(ShutdownKind::SessionEnd),
            ShutdownTrigger::EndSessionCanceled => None,
        }
    }

    pub fn budget(&self) -> Option<Duration> {
        match self {
            ShutdownTrigger::QueryEndSession {
                remaining_budget_ms,
                ..
            } => remaining_budget_ms.map(Duration::from_millis),
            ShutdownTrigger::EndSession { budget_ms, .. } => budget_ms.map(Duration::from_millis),
            _ => None,
        }
    }

    /// Stamp the trigger with the moment it was received
    pub fn arrived_now(self) -> ArrivedTrigger {
        ArrivedTrigger {
            trigger: self,
            arrived_at: Instant::now(),
        }
    }
}

/// A trigger together with its arrival time; the OS budget runs from here,
/// not from when the coordinator gets around to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivedTrigger {
    pub trigger: ShutdownTrigger,
    pub arrived_at: Instant,
}

impl ArrivedTrigger {
    pub fn request(&self) -> Option<ShutdownRequest> {
        self.trigger
            .kind()
            .map(|kind| ShutdownRequest::arrived_at(kind, self.arrived_at, self.trigger.budget()))
    }

    pub fn is_critical(&self) -> bool {
        self.trigger.kind() == Some(ShutdownKind::CriticalSessionEnd)
    }
}

/// A participant's answer to "may I close?"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Vote {
    Accept,
    Reject,
    Pending,
}

/// Close query state kept by each closable session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum CloseQueryState {
    NotAsked,
    Sent,
    Accepted,
    Rejected,
}

impl CloseQueryState {
    pub fn is_resolved(self) -> bool {
        matches!(self, CloseQueryState::Accepted | CloseQueryState::Rejected)
    }

    pub fn vote(self) -> Vote {
        match self {
            CloseQueryState::Accepted => Vote::Accept,
            CloseQueryState::Rejected => Vote::Reject,
            CloseQueryState::NotAsked | CloseQueryState::Sent => Vote::Pending,
        }
    }
}

/// Coordinator state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Phase {
    Idle,
    Validating,
    ConfirmingWithUser,
    CancelingDiskOps,
    ClosingSessions,
    UnloadingPlugins,
    ReleasingPanelResources,
    PersistingConfiguration,
    Terminated,
    Rejected,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Terminated | Phase::Rejected)
    }
}

/// Dialog handle collaborators should parent their own prompts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UiParent {
    MainWindow,
    /// The "closing, please wait" window shown during session triggers
    ShutdownProgress,
}

/// How a coordinator run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Root window destroyed; the process exits with code 0
    Terminated,
    /// The application stays open
    Rejected(ShutdownError),
    /// A session query found that every phase would succeed
    Allowed,
    /// Nothing to do: already terminated, or not a shutdown trigger
    Ignored,
}

impl ShutdownOutcome {
    /// Answer returned to an OS session query
    pub fn allows_close(&self) -> bool {
        matches!(self, ShutdownOutcome::Terminated | ShutdownOutcome::Allowed)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, ShutdownOutcome::Terminated)
    }
}

/// Everything observable about one coordinator run
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub kind: Option<ShutdownKind>,
    pub outcome: ShutdownOutcome,
    /// Phases entered, in order
    pub path: Vec<Phase>,
    /// Failures recorded but not allowed to block (critical shutdown only)
    pub degradations: Vec<ShutdownError>,
    pub cleanup_only: bool,
    pub config_saved: bool,
    /// `Some(verified)` when a backup was attempted
    pub backup_verified: Option<bool>,
    /// Served from the cached answer of an earlier session query
    pub from_cache: bool,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub(crate) fn ignored(kind: Option<ShutdownKind>) -> Self {
        Self {
            kind,
            outcome: ShutdownOutcome::Ignored,
            path: Vec::new(),
            degradations: Vec::new(),
            cleanup_only: false,
            config_saved: false,
            backup_verified: None,
            from_cache: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn final_phase(&self) -> Phase {
        self.path.last().copied().unwrap_or(Phase::Idle)
    }

    pub fn visited(&self, phase: Phase) -> bool {
        self.path.contains(&phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_only_critical_is_best_effort() {
        for kind in ShutdownKind::iter() {
            let expected = if kind == ShutdownKind::CriticalSessionEnd {
                Policy::BestEffort
            } else {
                Policy::Negotiated
            };
            assert_eq!(kind.policy(), expected, "{}", kind);
        }
    }

    #[test]
    fn test_user_close_does_not_pump() {
        assert!(!ShutdownKind::UserClose.pumps_events());
        assert!(!ShutdownKind::ForcedClose.pumps_events());
        assert!(ShutdownKind::SessionQuery.pumps_events());
        assert!(ShutdownKind::CriticalSessionEnd.pumps_events());
    }

    #[test]
    fn test_kind_parses_from_kebab_case() {
        assert_eq!(
            ShutdownKind::from_str("critical-session-end").unwrap(),
            ShutdownKind::CriticalSessionEnd
        );
        assert_eq!(ShutdownKind::UserClose.to_string(), "user-close");
        assert!(ShutdownKind::from_str("reboot").is_err());
    }

    #[test]
    fn test_trigger_kind_mapping() {
        let query = ShutdownTrigger::QueryEndSession {
            critical: false,
            remaining_budget_ms: Some(5000),
        };
        assert_eq!(query.kind(), Some(ShutdownKind::SessionQuery));
        assert_eq!(query.budget(), Some(Duration::from_millis(5000)));

        let critical_query = ShutdownTrigger::QueryEndSession {
            critical: true,
            remaining_budget_ms: None,
        };
        assert_eq!(critical_query.kind(), Some(ShutdownKind::CriticalSessionEnd));

        let end = ShutdownTrigger::EndSession {
            critical: false,
            budget_ms: None,
        };
        assert_eq!(end.kind(), Some(ShutdownKind::SessionEnd));
        assert_eq!(ShutdownTrigger::EndSessionCanceled.kind(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_arrived_trigger_keeps_its_stamp() {
        let arrived = ShutdownTrigger::EndSession {
            critical: true,
            budget_ms: Some(3000),
        }
        .arrived_now();
        tokio::time::advance(Duration::from_secs(2)).await;

        let request = arrived.request().unwrap();
        assert!(arrived.is_critical());
        assert_eq!(request.arrival(), arrived.arrived_at);
        assert_eq!(request.budget(), Some(Duration::from_millis(3000)));
        assert!(ShutdownTrigger::EndSessionCanceled
            .arrived_now()
            .request()
            .is_none());
    }

    #[test]
    fn test_close_query_state_votes() {
        assert_eq!(CloseQueryState::Accepted.vote(), Vote::Accept);
        assert_eq!(CloseQueryState::Rejected.vote(), Vote::Reject);
        assert_eq!(CloseQueryState::Sent.vote(), Vote::Pending);
        assert!(!CloseQueryState::NotAsked.is_resolved());
    }

    #[test]
    fn test_outcome_answers() {
        assert!(ShutdownOutcome::Allowed.allows_close());
        assert!(ShutdownOutcome::Terminated.allows_close());
        assert!(!ShutdownOutcome::Ignored.allows_close());
        assert!(!ShutdownOutcome::Rejected(ShutdownError::UserDeclined {
            prompt: "close?".to_string()
        })
        .allows_close());
    }
}
