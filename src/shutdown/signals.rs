//! OS signals as shutdown triggers
//!
//! | signal  | trigger                                   |
//! |---------|-------------------------------------------|
//! | SIGINT  | user close (twice within 2s exits at once) |
//! | SIGQUIT | forced close                              |
//! | SIGHUP  | session query, followed by the end on yes |
//! | SIGTERM | critical session end                      |

use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;

use crate::shutdown::types::{ArrivedTrigger, ShutdownTrigger};

/// Two interrupts closer than this skip negotiation entirely
const DOUBLE_INTERRUPT: Duration = Duration::from_secs(2);

/// Map a signal number to the trigger it stands for
pub fn trigger_for_signal(signal: i32) -> Option<ShutdownTrigger> {
    match signal {
        libc::SIGINT => Some(ShutdownTrigger::UserCloseRequested),
        libc::SIGQUIT => Some(ShutdownTrigger::ForcedCloseRequested),
        libc::SIGHUP => Some(ShutdownTrigger::QueryEndSession {
            critical: false,
            remaining_budget_ms: None,
        }),
        libc::SIGTERM => Some(ShutdownTrigger::EndSession {
            critical: true,
            budget_ms: None,
        }),
        _ => None,
    }
}

/// Forward OS signals to `triggers` until the receiver goes away
///
/// Each trigger is stamped on receipt so a critical budget counts from the
/// signal, not from when the event loop dequeues it.
pub fn setup_signal_handlers(triggers: UnboundedSender<ArrivedTrigger>) {
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }

        use tokio::signal::unix::{signal, SignalKind};
        let signals = [
            (SignalKind::interrupt(), libc::SIGINT),
            (SignalKind::quit(), libc::SIGQUIT),
            (SignalKind::hangup(), libc::SIGHUP),
            (SignalKind::terminate(), libc::SIGTERM),
        ];

        for (kind, number) in signals {
            let tx = triggers.clone();
            tokio::spawn(async move {
                let mut sig = match signal(kind) {
                    Ok(sig) => sig,
                    Err(e) => {
                        log::warn!("Cannot listen for signal {}: {}", number, e);
                        return;
                    }
                };
                let mut last_interrupt: Option<Instant> = None;
                while sig.recv().await.is_some() {
                    if number == libc::SIGINT {
                        let now = Instant::now();
                        if last_interrupt.is_some_and(|at| now - at < DOUBLE_INTERRUPT) {
                            log::warn!("Interrupted twice; exiting");
                            std::process::exit(130);
                        }
                        last_interrupt = Some(now);
                    }
                    let Some(trigger) = trigger_for_signal(number) else {
                        continue;
                    };
                    log::debug!("Signal {} -> {:?}", number, trigger);
                    if tx.send(trigger.arrived_now()).is_err() {
                        break;
                    }
                }
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if triggers
                    .send(ShutdownTrigger::UserCloseRequested.arrived_now())
                    .is_err()
                {
                    break;
                }
            }
        });
    }
}
