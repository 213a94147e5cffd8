//! Graceful shutdown and session termination
//!
//! The [`ShutdownCoordinator`] turns close requests from the user, the host
//! and the operating system into one ordered teardown of disk jobs, sessions,
//! extension modules, panels and configuration.

pub mod coordinator;
pub mod deadline;
pub mod error;
pub(crate) mod guarded;
pub mod guards;
pub mod host;
pub(crate) mod negotiation;
pub mod signals;
pub mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use coordinator::{Participants, ShutdownCoordinator};
pub use deadline::Deadline;
pub use error::{GuardKind, PersistStage, ShutdownError};
pub use guards::{BusyToken, GuardSnapshot, GuardState, PluginCallToken};
pub use host::{BlockReason, DegradationNotice, DiskJobsDecision, HostShell};
pub use signals::setup_signal_handlers;
pub use types::{
    ArrivedTrigger, CloseQueryState, Phase, Policy, ShutdownKind, ShutdownOutcome, ShutdownReport,
    ShutdownRequest, ShutdownTrigger, UiParent, Vote,
};
