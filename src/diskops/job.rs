//! Copy, move and delete jobs
//!
//! Jobs check their cancel token between chunks and between files. A canceled
//! job removes the file it was writing; files finished earlier were synced and
//! stay in place.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::diskops::error::{DiskJobError, DiskJobResult};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum JobKind {
    #[strum(serialize = "copy")]
    Copy,
    #[strum(serialize = "move")]
    Move,
    #[strum(serialize = "delete")]
    Delete,
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub kind: JobKind,
    pub sources: Vec<PathBuf>,
    /// Destination directory; unused for deletes
    pub target_dir: Option<PathBuf>,
    /// Pause after every chunk (speed-limited background copies)
    pub throttle: Option<Duration>,
}

impl JobSpec {
    pub fn copy(sources: Vec<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind: JobKind::Copy,
            sources,
            target_dir: Some(target_dir.into()),
            throttle: None,
        }
    }

    pub fn move_to(sources: Vec<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            kind: JobKind::Move,
            sources,
            target_dir: Some(target_dir.into()),
            throttle: None,
        }
    }

    pub fn delete(sources: Vec<PathBuf>) -> Self {
        Self {
            kind: JobKind::Delete,
            sources,
            target_dir: None,
            throttle: None,
        }
    }

    pub fn with_throttle(mut self, pause: Duration) -> Self {
        self.throttle = Some(pause);
        self
    }

    pub fn label(&self) -> String {
        match self.sources.as_slice() {
            [single] => format!("{} {}", self.kind, single.display()),
            many => format!("{} {} items", self.kind, many.len()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub files: usize,
    pub bytes: u64,
}

/// Cooperative cancellation flag shared between a job and its supervisor
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct FilePlan {
    files: Vec<(PathBuf, Option<PathBuf>)>,
    dirs: Vec<PathBuf>,
}

/// Expand sources into individual files and the directories that hold them
async fn plan(spec: &JobSpec) -> DiskJobResult<FilePlan> {
    let mut plan = FilePlan {
        files: Vec::new(),
        dirs: Vec::new(),
    };

    for source in &spec.sources {
        let metadata = tokio::fs::metadata(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DiskJobError::MissingSource {
                    path: source.clone(),
                }
            } else {
                DiskJobError::io("inspect", source, e)
            }
        })?;
        let target = match (&spec.target_dir, source.file_name()) {
            (Some(dir), Some(name)) => Some(dir.join(name)),
            _ => None,
        };

        if !metadata.is_dir() {
            plan.files.push((source.clone(), target));
            continue;
        }

        let mut pending = vec![(source.clone(), target)];
        while let Some((dir, dir_target)) = pending.pop() {
            plan.dirs.push(dir.clone());
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| DiskJobError::io("list", &dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| DiskJobError::io("list", &dir, e))?
            {
                let path = entry.path();
                let entry_target = dir_target.as_ref().map(|t| t.join(entry.file_name()));
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| DiskJobError::io("inspect", &path, e))?;
                if file_type.is_dir() {
                    pending.push((path, entry_target));
                } else {
                    plan.files.push((path, entry_target));
                }
            }
        }
    }
    Ok(plan)
}

/// Copy one file; returns `None` when canceled (the partial file is removed)
async fn copy_file(
    source: &Path,
    target: &Path,
    cancel: &CancelToken,
    throttle: Option<Duration>,
) -> DiskJobResult<Option<u64>> {
    let mut input = File::open(source)
        .await
        .map_err(|e| DiskJobError::io("open", source, e))?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DiskJobError::io("create", parent, e))?;
    }
    let mut output = File::create(target)
        .await
        .map_err(|e| DiskJobError::io("create", target, e))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    let result: DiskJobResult<bool> = async {
        loop {
            if cancel.is_canceled() {
                return Ok(false);
            }
            let read = input
                .read(&mut buffer)
                .await
                .map_err(|e| DiskJobError::io("read", source, e))?;
            if read == 0 {
                break;
            }
            output
                .write_all(&buffer[..read])
                .await
                .map_err(|e| DiskJobError::io("write", target, e))?;
            copied += read as u64;
            if let Some(pause) = throttle {
                tokio::time::sleep(pause).await;
            }
        }
        output
            .flush()
            .await
            .map_err(|e| DiskJobError::io("flush", target, e))?;
        output
            .sync_all()
            .await
            .map_err(|e| DiskJobError::io("sync", target, e))?;
        Ok(true)
    }
    .await;

    match result {
        Ok(true) => Ok(Some(copied)),
        Ok(false) => {
            drop(output);
            remove_partial(target).await;
            Ok(None)
        }
        Err(e) => {
            drop(output);
            remove_partial(target).await;
            Err(e)
        }
    }
}

async fn remove_partial(target: &Path) {
    if let Err(e) = tokio::fs::remove_file(target).await {
        log::warn!("Could not remove partial file {}: {}", target.display(), e);
    }
}

/// Run a job to completion or cancellation
pub async fn run_job(spec: &JobSpec, cancel: &CancelToken) -> DiskJobResult<JobReport> {
    let plan = plan(spec).await?;
    let total = plan.files.len();
    let mut report = JobReport::default();

    for (source, target) in &plan.files {
        if cancel.is_canceled() {
            return Err(DiskJobError::Canceled {
                completed: report.files,
                total,
            });
        }

        if let (JobKind::Move, Some(target)) = (spec.kind, target) {
            // same file system: no data to copy
            if tokio::fs::rename(source, target).await.is_ok() {
                report.files += 1;
                continue;
            }
        }

        match (spec.kind, target) {
            (JobKind::Delete, _) => {
                tokio::fs::remove_file(source)
                    .await
                    .map_err(|e| DiskJobError::io("delete", source, e))?;
            }
            (kind, Some(target)) => {
                match copy_file(source, target, cancel, spec.throttle).await? {
                    Some(bytes) => report.bytes += bytes,
                    None => {
                        return Err(DiskJobError::Canceled {
                            completed: report.files,
                            total,
                        })
                    }
                }
                if kind == JobKind::Move {
                    tokio::fs::remove_file(source)
                        .await
                        .map_err(|e| DiskJobError::io("remove", source, e))?;
                }
            }
            (_, None) => {
                return Err(DiskJobError::MissingSource {
                    path: source.clone(),
                })
            }
        }
        report.files += 1;
    }

    if spec.kind != JobKind::Copy {
        // deepest first; a directory that still has content is left alone
        for dir in plan.dirs.iter().rev() {
            let _ = tokio::fs::remove_dir(dir).await;
        }
    }
    Ok(report)
}
