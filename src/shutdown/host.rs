//! Host shell seam
//!
//! The application shell owns the main window, user dialogs and the event
//! queue. The coordinator talks to it only through [`HostShell`].

use async_trait::async_trait;
use strum_macros::Display;

use crate::core::poll::EventPump;
use crate::shutdown::error::GuardKind;
use crate::shutdown::types::ShutdownKind;

/// Answer from the "disk operations are still running" dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DiskJobsDecision {
    CancelAndContinue,
    WaitForCompletion,
    /// Keep the jobs running and stay open
    Decline,
}

/// Reason shown to the OS while a session end is held up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BlockReason {
    #[strum(serialize = "Waiting for disk operations to finish")]
    DiskOperations,
    #[strum(serialize = "Waiting for open sessions to close")]
    Sessions,
    #[strum(serialize = "Saving configuration")]
    SavingConfiguration,
}

/// What a critical shutdown is about to throw away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DegradationNotice {
    pub kind: ShutdownKind,
    pub active_jobs: usize,
    pub open_sessions: usize,
    pub failed_guards: Vec<GuardKind>,
    /// Only disk jobs will be stopped; nothing else is torn down
    pub cleanup_only: bool,
}

impl DegradationNotice {
    pub fn is_empty(&self) -> bool {
        self.active_jobs == 0 && self.open_sessions == 0 && self.failed_guards.is_empty()
    }
}

#[async_trait]
pub trait HostShell: Send + Sync {
    /// "Do you want to close the application?"
    async fn confirm_close(&self) -> bool;

    async fn disk_jobs_dialog(&self, active_jobs: usize) -> DiskJobsDecision;

    /// Shown once per critical shutdown, before anything destructive happens
    async fn announce_degradation(&self, notice: &DegradationNotice);

    /// A session end was rejected and the OS will close us anyway
    async fn notify_forced_shutdown(&self);

    fn set_block_reason(&self, reason: Option<BlockReason>);

    /// Dispatch pending host events and return promptly
    async fn pump_events(&self);

    /// Tear down the root window; the process exits afterwards
    fn destroy_root_window(&self);
}

/// Adapts a host shell to the polling helper's pump seam
pub(crate) struct HostPump<'a>(pub(crate) &'a dyn HostShell);

#[async_trait]
impl EventPump for HostPump<'_> {
    async fn pump_events(&self) {
        self.0.pump_events().await;
    }
}
