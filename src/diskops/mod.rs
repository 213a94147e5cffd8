//! Background disk operations
//!
//! Copy, move and delete jobs run on their own tasks. Shutdown only needs to
//! count them, cancel them and wait for them to unwind.

pub mod error;
pub mod job;
pub mod supervisor;

pub use error::{DiskJobError, DiskJobResult};
pub use job::{CancelToken, JobKind, JobReport, JobSpec};
pub use supervisor::{DiskJobSupervisor, JobId};

use std::time::Duration;

use crate::core::poll::{poll_until, EventPump, PollOutcome};

pub trait DiskOperationSupervisor: Send + Sync {
    fn active_job_count(&self) -> usize;

    /// Signal every active job to stop; returns without waiting
    fn cancel_all(&self);

    fn is_idle(&self) -> bool {
        self.active_job_count() == 0
    }
}

/// Poll `is_idle` at a fixed interval until idle or `ceiling` elapses
pub async fn wait_until_idle(
    supervisor: &dyn DiskOperationSupervisor,
    interval: Duration,
    ceiling: Duration,
    pump: Option<&dyn EventPump>,
) -> PollOutcome {
    poll_until(|| supervisor.is_idle(), interval, ceiling, pump).await
}
