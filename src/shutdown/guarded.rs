//! Collaborator call wrapper
//!
//! A panicking or hung collaborator must never unwind through the coordinator
//! or stall it past the deadline. Every call goes through [`guarded`], which
//! turns both into a [`CallFailure`].

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use crate::shutdown::error::ShutdownError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallFailure {
    Panicked,
    TimedOut(Duration),
}

impl CallFailure {
    pub(crate) fn into_error(self, participant: &str, operation: &str) -> ShutdownError {
        match self {
            CallFailure::Panicked => {
                ShutdownError::vetoed(participant, format!("panicked during {}", operation))
            }
            CallFailure::TimedOut(waited) => {
                ShutdownError::timed_out(format!("{} {}", participant, operation), waited)
            }
        }
    }
}

/// Await `fut`, catching panics and enforcing `limit` when given
pub(crate) async fn guarded<F>(
    participant: &str,
    operation: &str,
    limit: Option<Duration>,
    fut: F,
) -> Result<F::Output, CallFailure>
where
    F: Future,
{
    let caught = AssertUnwindSafe(fut).catch_unwind();
    let result = match limit {
        Some(limit) => match tokio::time::timeout(limit, caught).await {
            Ok(result) => result.map_err(|_| CallFailure::Panicked),
            Err(_) => Err(CallFailure::TimedOut(limit)),
        },
        None => caught.await.map_err(|_| CallFailure::Panicked),
    };

    match &result {
        Err(CallFailure::Panicked) => {
            log::error!("{} panicked during {}", participant, operation)
        }
        Err(CallFailure::TimedOut(limit)) => {
            log::warn!("{} {} timed out after {:?}", participant, operation, limit)
        }
        Ok(_) => {}
    }
    result
}

/// Synchronous counterpart of [`guarded`]
pub(crate) fn guarded_sync<R>(
    participant: &str,
    operation: &str,
    call: impl FnOnce() -> R,
) -> Result<R, CallFailure> {
    std::panic::catch_unwind(AssertUnwindSafe(call)).map_err(|_| {
        log::error!("{} panicked during {}", participant, operation);
        CallFailure::Panicked
    })
}
