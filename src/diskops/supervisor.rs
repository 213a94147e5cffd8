//! Background job supervisor

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::task::JoinHandle;

use crate::core::sync::recover_mutex_poison;
use crate::diskops::job::{run_job, CancelToken, JobSpec};
use crate::diskops::DiskOperationSupervisor;

pub type JobId = u64;

struct ActiveJob {
    id: JobId,
    label: String,
    cancel: CancelToken,
    task: JoinHandle<()>,
}

/// Tracks copy/move/delete jobs running on their own tasks
#[derive(Default)]
pub struct DiskJobSupervisor {
    jobs: Mutex<Vec<ActiveJob>>,
    next_id: AtomicU64,
}

impl DiskJobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a job; it logs its own outcome
    pub fn start(&self, spec: JobSpec) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let label = spec.label();
        let cancel = CancelToken::new();
        let job_cancel = cancel.clone();
        let job_label = label.clone();

        let task = tokio::spawn(async move {
            match run_job(&spec, &job_cancel).await {
                Ok(report) => log::info!(
                    "Job #{} ({}) finished: {} files, {} bytes",
                    id,
                    job_label,
                    report.files,
                    report.bytes
                ),
                Err(e) if e.is_canceled() => log::info!("Job #{} ({}) {}", id, job_label, e),
                Err(e) => log::warn!("Job #{} ({}) failed: {}", id, job_label, e),
            }
        });

        log::debug!("Started job #{}: {}", id, label);
        recover_mutex_poison(self.jobs.lock(), "disk jobs").push(ActiveJob {
            id,
            label,
            cancel,
            task,
        });
        id
    }

    /// Labels of jobs still running
    pub fn active_labels(&self) -> Vec<String> {
        let mut jobs = recover_mutex_poison(self.jobs.lock(), "disk jobs");
        jobs.retain(|job| !job.task.is_finished());
        jobs.iter().map(|job| format!("#{} {}", job.id, job.label)).collect()
    }
}

impl DiskOperationSupervisor for DiskJobSupervisor {
    fn active_job_count(&self) -> usize {
        let mut jobs = recover_mutex_poison(self.jobs.lock(), "disk jobs");
        jobs.retain(|job| !job.task.is_finished());
        jobs.len()
    }

    fn cancel_all(&self) {
        let jobs = recover_mutex_poison(self.jobs.lock(), "disk jobs");
        for job in jobs.iter().filter(|job| !job.task.is_finished()) {
            log::debug!("Canceling job #{} ({})", job.id, job.label);
            job.cancel.cancel();
        }
    }
}
