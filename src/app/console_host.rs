//! Terminal stand-in for the main window
//!
//! Prompts go to stderr and are answered on stdin. Without a terminal every
//! question takes its non-blocking default: close, cancel jobs, never force.

use async_trait::async_trait;
use colored::Colorize;
use std::io::{BufRead, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::core::sync::recover_mutex_poison;
use crate::plugin::UnloadPrompt;
use crate::shutdown::host::{BlockReason, DegradationNotice, DiskJobsDecision, HostShell};
use crate::shutdown::types::UiParent;

pub struct ConsoleHost {
    interactive: bool,
    color: bool,
    destroyed: AtomicBool,
    closed: Notify,
    block_reason: Mutex<Option<BlockReason>>,
}

impl ConsoleHost {
    pub fn new(color: bool) -> Self {
        Self::with_interaction(std::io::stdin().is_terminal(), color)
    }

    pub fn with_interaction(interactive: bool, color: bool) -> Self {
        Self {
            interactive,
            color,
            destroyed: AtomicBool::new(false),
            closed: Notify::new(),
            block_reason: Mutex::new(None),
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Resolves once the root window has been destroyed
    pub async fn wait_destroyed(&self) {
        let notified = self.closed.notified();
        if self.is_destroyed() {
            return;
        }
        notified.await;
    }

    pub fn block_reason(&self) -> Option<BlockReason> {
        *recover_mutex_poison(self.block_reason.lock(), "console host")
    }

    fn say(&self, text: &str) {
        if self.color {
            eprintln!("{}", text.yellow().bold());
        } else {
            eprintln!("{}", text);
        }
    }

    /// Ask on the terminal; `None` when not interactive or stdin is gone
    async fn ask(&self, question: String) -> Option<String> {
        if !self.interactive {
            return None;
        }
        let answer = tokio::task::spawn_blocking(move || {
            eprint!("{} ", question);
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim().to_ascii_lowercase()),
            }
        })
        .await;
        answer.ok().flatten()
    }

    async fn ask_yes_no(&self, question: &str, default: bool) -> bool {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        match self.ask(format!("{} {}", question, hint)).await.as_deref() {
            Some("y") | Some("yes") => true,
            Some("n") | Some("no") => false,
            _ => default,
        }
    }
}

#[async_trait]
impl HostShell for ConsoleHost {
    async fn confirm_close(&self) -> bool {
        self.ask_yes_no("Do you want to close the application?", true)
            .await
    }

    async fn disk_jobs_dialog(&self, active_jobs: usize) -> DiskJobsDecision {
        let question = format!(
            "{} disk operation(s) still running: [c]ancel them, [w]ait, or [k]eep running?",
            active_jobs
        );
        match self.ask(question).await.as_deref() {
            Some("w") | Some("wait") => DiskJobsDecision::WaitForCompletion,
            Some("k") | Some("keep") => DiskJobsDecision::Decline,
            _ => DiskJobsDecision::CancelAndContinue,
        }
    }

    async fn announce_degradation(&self, notice: &DegradationNotice) {
        let mut lines = vec![format!("The system is ending the session ({}).", notice.kind)];
        if notice.active_jobs > 0 {
            lines.push(format!(
                "{} disk operation(s) will be canceled.",
                notice.active_jobs
            ));
        }
        if notice.open_sessions > 0 {
            lines.push(format!(
                "{} open window(s) will close without saving.",
                notice.open_sessions
            ));
        }
        for guard in &notice.failed_guards {
            lines.push(format!("Cannot close cleanly: {}.", guard.description()));
        }
        if notice.cleanup_only {
            lines.push("Configuration will not be saved.".to_string());
        }
        self.say(&lines.join("\n"));
    }

    async fn notify_forced_shutdown(&self) {
        self.say("The application refused to close; the system may end it anyway.");
    }

    fn set_block_reason(&self, reason: Option<BlockReason>) {
        match reason {
            Some(reason) => log::info!("Holding session end: {}", reason),
            None => log::debug!("Session end no longer held"),
        }
        *recover_mutex_poison(self.block_reason.lock(), "console host") = reason;
    }

    async fn pump_events(&self) {
        tokio::task::yield_now().await;
    }

    fn destroy_root_window(&self) {
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            self.closed.notify_waiters();
        }
    }
}

#[async_trait]
impl UnloadPrompt for ConsoleHost {
    async fn confirm_force_unload(&self, parent: UiParent, extension: &str) -> bool {
        log::debug!("Force-unload prompt for '{}' over {}", extension, parent);
        self.ask_yes_no(
            &format!("Extension '{}' refuses to unload. Unload it anyway?", extension),
            false,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::types::ShutdownKind;

    fn quiet_host() -> ConsoleHost {
        ConsoleHost::with_interaction(false, false)
    }

    #[tokio::test]
    async fn test_non_interactive_defaults() {
        let host = quiet_host();
        assert!(host.confirm_close().await);
        assert_eq!(
            host.disk_jobs_dialog(2).await,
            DiskJobsDecision::CancelAndContinue
        );
        assert!(
            !host
                .confirm_force_unload(UiParent::MainWindow, "ftp")
                .await
        );
    }

    #[tokio::test]
    async fn test_destroy_wakes_waiter_once() {
        let host = std::sync::Arc::new(quiet_host());
        let waiter = {
            let host = host.clone();
            tokio::spawn(async move { host.wait_destroyed().await })
        };
        tokio::task::yield_now().await;

        host.destroy_root_window();
        host.destroy_root_window();
        waiter.await.unwrap();
        assert!(host.is_destroyed());
        // already destroyed: returns at once
        host.wait_destroyed().await;
    }

    #[tokio::test]
    async fn test_block_reason_is_tracked() {
        let host = quiet_host();
        host.set_block_reason(Some(BlockReason::SavingConfiguration));
        assert_eq!(host.block_reason(), Some(BlockReason::SavingConfiguration));
        host.set_block_reason(None);
        assert_eq!(host.block_reason(), None);
    }

    #[tokio::test]
    async fn test_announcement_does_not_block() {
        let host = quiet_host();
        host.announce_degradation(&DegradationNotice {
            kind: ShutdownKind::CriticalSessionEnd,
            active_jobs: 1,
            open_sessions: 2,
            failed_guards: Vec::new(),
            cleanup_only: false,
        })
        .await;
    }
}
