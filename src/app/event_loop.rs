//! Trigger dispatch loop
//!
//! Receives shutdown triggers (from OS signals in the binary) and hands them to
//! the coordinator one at a time, so a second trigger never interleaves with
//! a run in progress. The one exception is a critical session end: the OS
//! will not wait for a negotiated run (or an unanswered prompt) to finish, so
//! it abandons that run and starts at once. The loop ends once the
//! coordinator has terminated.

use std::collections::VecDeque;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::shutdown::{
    ArrivedTrigger, ShutdownCoordinator, ShutdownOutcome, ShutdownReport, ShutdownTrigger,
};

pub struct EventLoop {
    coordinator: ShutdownCoordinator,
    triggers: UnboundedReceiver<ArrivedTrigger>,
}

impl EventLoop {
    pub fn new(coordinator: ShutdownCoordinator, triggers: UnboundedReceiver<ArrivedTrigger>) -> Self {
        Self {
            coordinator,
            triggers,
        }
    }

    /// Dispatch triggers until the coordinator terminates
    ///
    /// Returns the terminating report, or `None` when every sender went away
    /// while the application was still open.
    pub async fn run(mut self) -> Option<ShutdownReport> {
        let mut backlog: VecDeque<ArrivedTrigger> = VecDeque::new();
        let mut open = true;

        loop {
            let arrived = match backlog.pop_front() {
                Some(arrived) => arrived,
                None if open => match self.triggers.recv().await {
                    Some(arrived) => arrived,
                    None => break,
                },
                None => break,
            };
            let preemptible = !arrived.is_critical();

            let finished = {
                let run = handle(&mut self.coordinator, arrived);
                tokio::pin!(run);
                loop {
                    tokio::select! {
                        report = &mut run => break Some(report),
                        incoming = self.triggers.recv(), if open => match incoming {
                            Some(next) if preemptible && next.is_critical() => {
                                log::warn!(
                                    "Critical session end arrived during {:?}; abandoning it",
                                    arrived.trigger
                                );
                                backlog.push_front(next);
                                break None;
                            }
                            Some(next) => backlog.push_back(next),
                            None => open = false,
                        },
                    }
                }
            };

            if let Some(report) = finished {
                if self.coordinator.is_terminated() {
                    return Some(report);
                }
            }
        }
        log::debug!("Trigger channel closed; leaving the event loop");
        None
    }
}

async fn handle(coordinator: &mut ShutdownCoordinator, arrived: ArrivedTrigger) -> ShutdownReport {
    let report = coordinator.dispatch_arrived(arrived).await;
    log_report(&report);

    // nothing else delivers the end after an allowed hangup query
    match arrived.trigger {
        ShutdownTrigger::QueryEndSession {
            critical: false,
            remaining_budget_ms,
        } if report.outcome.allows_close() => {
            let end = coordinator.os_end_session(false, remaining_budget_ms).await;
            log_report(&end);
            end
        }
        _ => report,
    }
}

fn log_report(report: &ShutdownReport) {
    let kind = report
        .kind
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "session end canceled".to_string());
    match &report.outcome {
        ShutdownOutcome::Terminated => log::info!(
            "{}: terminated after {:?} ({} degradations)",
            kind,
            report.elapsed,
            report.degradations.len()
        ),
        ShutdownOutcome::Allowed if report.from_cache => {
            log::info!("{}: allowed (cached answer)", kind)
        }
        ShutdownOutcome::Allowed => log::info!("{}: allowed", kind),
        ShutdownOutcome::Rejected(reason) => {
            log::info!("{}: staying open: {}", kind, reason)
        }
        ShutdownOutcome::Ignored => log::debug!("{}: ignored", kind),
    }
}
