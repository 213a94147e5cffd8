//! Search and viewer session behaviour

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::session::handle::SessionDelegate;

/// Asks the user whether a running search may be stopped
pub type StopSearchPrompt = Box<dyn Fn() -> bool + Send + Sync>;

/// A file search that may still be running
pub struct SearchDelegate {
    running: Arc<AtomicBool>,
    confirm_stop: StopSearchPrompt,
}

impl SearchDelegate {
    pub fn new(running: Arc<AtomicBool>, confirm_stop: StopSearchPrompt) -> Self {
        Self {
            running,
            confirm_stop,
        }
    }
}

#[async_trait]
impl SessionDelegate for SearchDelegate {
    async fn may_close(&mut self, force_no_prompt: bool) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return true;
        }
        if force_no_prompt || (self.confirm_stop)() {
            self.running.store(false, Ordering::Release);
            log::debug!("Stopped running search for shutdown");
            return true;
        }
        false
    }

    async fn teardown(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// A viewer or editor window, optionally showing a temporary copy of a file
///
/// Files opened from archives or extension file systems are extracted to a
/// temporary location; that copy is removed when the viewer closes.
pub struct ViewerDelegate {
    temp_copy: Option<PathBuf>,
    unsaved_changes: Arc<AtomicBool>,
}

impl ViewerDelegate {
    pub fn new(temp_copy: Option<PathBuf>, unsaved_changes: Arc<AtomicBool>) -> Self {
        Self {
            temp_copy,
            unsaved_changes,
        }
    }
}

#[async_trait]
impl SessionDelegate for ViewerDelegate {
    async fn may_close(&mut self, force_no_prompt: bool) -> bool {
        force_no_prompt || !self.unsaved_changes.load(Ordering::Acquire)
    }

    async fn teardown(&mut self) {
        if let Some(path) = self.temp_copy.take() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => log::debug!("Removed viewer temp copy {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Could not remove temp copy {}: {}", path.display(), e),
            }
        }
    }
}
