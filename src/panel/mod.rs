//! File panel resource bindings
//!
//! A panel is bound to a disk directory, an opened archive or an extension
//! file system. Releasing a binding is two-phase so a shutdown can back out if
//! any panel refuses.

pub mod file_panel;

pub use file_panel::{FilePanel, PanelBinding, ReleaseState};

use async_trait::async_trait;

#[async_trait]
pub trait PanelResourceManager: Send + Sync {
    fn name(&self) -> &str;

    /// Get ready to release the binding; `force` means refusing is not an option
    async fn prepare_release(&self, force: bool) -> bool;

    /// Release a prepared binding
    async fn commit(&self);

    /// Back out of a prepared release; the panel stays usable
    async fn rollback(&self);

    /// Drop the binding without any cleanup
    async fn force_detach(&self);
}
