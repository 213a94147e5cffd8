//! OS termination deadline
//!
//! A critical session end is killed by the OS once its budget runs out. The
//! coordinator keeps a safety margin in reserve and bounds every wait by what
//! is left.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    arrived_at: Instant,
    budget: Option<Duration>,
    safety_margin: Duration,
}

impl Deadline {
    pub fn new(arrived_at: Instant, budget: Option<Duration>, safety_margin: Duration) -> Self {
        Self {
            arrived_at,
            budget,
            safety_margin,
        }
    }

    /// No OS budget: waits are bounded by their own caps only
    pub fn unbounded(arrived_at: Instant) -> Self {
        Self::new(arrived_at, None, Duration::ZERO)
    }

    pub fn elapsed(&self) -> Duration {
        self.arrived_at.elapsed()
    }

    /// Usable time left: budget minus elapsed minus the safety margin
    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|budget| {
            budget
                .saturating_sub(self.safety_margin)
                .saturating_sub(self.elapsed())
        })
    }

    pub fn is_expired(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    /// Ceiling for one wait: `cap`, shortened to what is left minus `reserve`
    pub fn ceiling(&self, cap: Duration, reserve: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => cap.min(remaining.saturating_sub(reserve)),
            None => cap,
        }
    }

    /// Limit for a single collaborator call, `None` when nothing bounds it
    pub fn call_limit(&self, cap: Option<Duration>) -> Option<Duration> {
        match (self.remaining(), cap) {
            (Some(remaining), Some(cap)) => Some(remaining.min(cap)),
            (Some(remaining), None) => Some(remaining),
            (None, cap) => cap,
        }
    }
}
