//! Negotiated close of sessions
//!
//! Sessions close group by group, searches before viewers. Within a group
//! every session is asked first; only when all of them accepted does any of
//! them receive the close instruction. A refusal therefore leaves the whole
//! group open and usable.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ShutdownSettings;
use crate::core::poll::{poll_until, EventPump};
use crate::session::{ClosableSession, SessionKind};
use crate::shutdown::deadline::Deadline;
use crate::shutdown::error::ShutdownError;
use crate::shutdown::guarded::guarded;
use crate::shutdown::types::{CloseQueryState, Vote};

pub(crate) type SessionGroups = Vec<(SessionKind, Vec<Arc<dyn ClosableSession>>)>;

/// Ask one session whether it may close
///
/// Joins a query another requester already has in flight instead of posting a
/// second one; only the requester that posted resets the state afterwards.
/// Returns `Pending` when no answer arrived within `ceiling`.
pub(crate) async fn negotiate_close(
    session: &dyn ClosableSession,
    force_no_prompt: bool,
    interval: Duration,
    ceiling: Duration,
    pump: Option<&dyn EventPump>,
) -> Vote {
    let started = Instant::now();
    let mut posted = session.request_close(force_no_prompt);
    if !posted {
        log::debug!("{}: joining close query already in flight", session.label());
    }

    loop {
        let remaining = ceiling.saturating_sub(started.elapsed());
        let joined = !posted;
        let outcome = poll_until(
            || {
                let state = session.close_query_state();
                state.is_resolved() || (joined && state == CloseQueryState::NotAsked)
            },
            interval,
            remaining,
            pump,
        )
        .await;

        let state = session.close_query_state();
        if !outcome.is_ready() {
            if posted {
                session.finish_close_query();
            }
            return Vote::Pending;
        }
        if state == CloseQueryState::NotAsked {
            // the query we joined was answered and reset before we saw it
            posted = session.request_close(force_no_prompt);
            continue;
        }
        if posted {
            session.finish_close_query();
        }
        return state.vote();
    }
}

/// Negotiate and close every group in order
///
/// With `evaluate_only` sessions are asked but never closed. Returns the
/// number of sessions closed, or the error that vetoed the phase.
pub(crate) async fn close_negotiated(
    groups: &SessionGroups,
    timing: &ShutdownSettings,
    evaluate_only: bool,
    deadline: &Deadline,
    pump: Option<&dyn EventPump>,
) -> Result<usize, ShutdownError> {
    let mut closed = 0;
    for (kind, sessions) in groups {
        log::debug!("Asking {} {} sessions to close", sessions.len(), kind);
        for session in sessions {
            let label = session.label();
            let ceiling = deadline.ceiling(timing.session_vote_timeout(), Duration::ZERO);
            let vote = guarded(
                &label,
                "close query",
                None,
                negotiate_close(
                    session.as_ref(),
                    false,
                    timing.session_poll_interval(),
                    ceiling,
                    pump,
                ),
            )
            .await
            .map_err(|failure| failure.into_error(&label, "close query"))?;

            match vote {
                Vote::Accept => {}
                Vote::Reject => {
                    log::info!("{} refused to close", label);
                    return Err(ShutdownError::vetoed(label, "refused to close"));
                }
                Vote::Pending => {
                    return Err(ShutdownError::timed_out(
                        format!("{} close query", label),
                        ceiling,
                    ))
                }
            }
        }

        if evaluate_only {
            continue;
        }
        for session in sessions {
            let label = session.label();
            match guarded(
                &label,
                "close",
                Some(timing.session_close_grace()),
                session.close(),
            )
            .await
            {
                Ok(()) => closed += 1,
                Err(_) => log::warn!("{} did not finish closing in time", label),
            }
        }
    }
    Ok(closed)
}

/// Close every session without asking, group by group
///
/// Closes run on their own tasks; each group gets at most `ceiling` before the
/// next one starts.
pub(crate) async fn force_close(groups: SessionGroups, ceiling: Duration) -> usize {
    let mut signaled = 0;
    for (kind, sessions) in groups {
        log::warn!("Force-closing {} {} sessions", sessions.len(), kind);
        let tasks: Vec<_> = sessions
            .into_iter()
            .map(|session| {
                signaled += 1;
                // let a running search stop without prompting before teardown
                session.request_close(true);
                tokio::spawn(async move { session.close().await })
            })
            .collect();
        if tokio::time::timeout(ceiling, join_all(tasks)).await.is_err() {
            log::warn!("{} sessions still closing; moving on", kind);
        }
    }
    signaled
}
