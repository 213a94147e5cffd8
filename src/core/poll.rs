//! Bounded cooperative polling
//!
//! Every wait performed while shutting down is a poll loop with a hard ceiling.
//! Between polls the loop hands control back to the host so the platform keeps
//! seeing a responsive application.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Host event queue that must keep draining while the coordinator waits
#[async_trait]
pub trait EventPump: Send + Sync {
    /// Dispatch whatever host events are pending and return promptly
    async fn pump_events(&self);
}

/// Pump that only yields to the runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldPump;

#[async_trait]
impl EventPump for YieldPump {
    async fn pump_events(&self) {
        tokio::task::yield_now().await;
    }
}

/// Result of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition became true
    Ready,
    /// The ceiling elapsed first
    TimedOut,
}

impl PollOutcome {
    pub fn is_ready(self) -> bool {
        self == PollOutcome::Ready
    }
}

/// Poll `ready` every `interval` until it returns true or `ceiling` elapses
///
/// The condition is checked once before any waiting, so a zero ceiling still
/// reports `Ready` for a condition that already holds. When a pump is given it
/// is drained before each sleep.
pub async fn poll_until<F>(
    mut ready: F,
    interval: Duration,
    ceiling: Duration,
    pump: Option<&dyn EventPump>,
) -> PollOutcome
where
    F: FnMut() -> bool,
{
    let started = Instant::now();
    loop {
        if ready() {
            return PollOutcome::Ready;
        }

        let elapsed = started.elapsed();
        if elapsed >= ceiling {
            return PollOutcome::TimedOut;
        }

        if let Some(pump) = pump {
            pump.pump_events().await;
        }

        let nap = interval.min(ceiling - elapsed).max(Duration::from_millis(1));
        tokio::time::sleep(nap).await;
    }
}
