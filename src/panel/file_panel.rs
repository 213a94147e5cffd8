use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;
use strum_macros::Display;

use crate::core::sync::recover_mutex_poison;
use crate::panel::PanelResourceManager;

/// What a panel is currently showing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelBinding {
    Disk {
        path: PathBuf,
    },
    /// An opened archive; `pending_update` when an edited member has not
    /// been packed back yet
    Archive {
        archive: PathBuf,
        inner: PathBuf,
        pending_update: bool,
    },
    /// A file system provided by an extension module
    ExtensionFs {
        extension: String,
        path: String,
        can_detach: bool,
    },
    Detached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ReleaseState {
    Bound,
    Prepared,
    Released,
}

#[derive(Debug)]
struct PanelState {
    binding: PanelBinding,
    release: ReleaseState,
}

#[derive(Debug)]
pub struct FilePanel {
    name: String,
    state: Mutex<PanelState>,
}

impl FilePanel {
    pub fn new(name: impl Into<String>, binding: PanelBinding) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PanelState {
                binding,
                release: ReleaseState::Bound,
            }),
        }
    }

    pub fn binding(&self) -> PanelBinding {
        recover_mutex_poison(self.state.lock(), &self.name)
            .binding
            .clone()
    }

    pub fn release_state(&self) -> ReleaseState {
        recover_mutex_poison(self.state.lock(), &self.name).release
    }

    /// Rebind a panel that is not being released
    pub fn navigate(&self, binding: PanelBinding) -> bool {
        let mut state = recover_mutex_poison(self.state.lock(), &self.name);
        if state.release != ReleaseState::Bound {
            return false;
        }
        state.binding = binding;
        true
    }
}

#[async_trait]
impl PanelResourceManager for FilePanel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare_release(&self, force: bool) -> bool {
        let mut state = recover_mutex_poison(self.state.lock(), &self.name);
        if state.release == ReleaseState::Released {
            return true;
        }
        let releasable = match &state.binding {
            PanelBinding::Disk { .. } | PanelBinding::Detached => true,
            PanelBinding::Archive {
                pending_update,
                archive,
                ..
            } => {
                if *pending_update {
                    log::info!(
                        "Panel '{}': {} has edits not packed back",
                        self.name,
                        archive.display()
                    );
                }
                !pending_update || force
            }
            PanelBinding::ExtensionFs { can_detach, .. } => *can_detach || force,
        };
        if releasable {
            state.release = ReleaseState::Prepared;
        }
        releasable
    }

    async fn commit(&self) {
        let mut state = recover_mutex_poison(self.state.lock(), &self.name);
        if state.release == ReleaseState::Prepared {
            log::debug!("Panel '{}' released {:?}", self.name, state.binding);
            state.binding = PanelBinding::Detached;
            state.release = ReleaseState::Released;
        }
    }

    async fn rollback(&self) {
        let mut state = recover_mutex_poison(self.state.lock(), &self.name);
        if state.release == ReleaseState::Prepared {
            state.release = ReleaseState::Bound;
        }
    }

    async fn force_detach(&self) {
        let mut state = recover_mutex_poison(self.state.lock(), &self.name);
        if state.release != ReleaseState::Released {
            log::warn!("Panel '{}' force-detached from {:?}", self.name, state.binding);
        }
        state.binding = PanelBinding::Detached;
        state.release = ReleaseState::Released;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_panel(pending_update: bool) -> FilePanel {
        FilePanel::new(
            "right",
            PanelBinding::Archive {
                archive: PathBuf::from("/tmp/src.zip"),
                inner: PathBuf::from("lib"),
                pending_update,
            },
        )
    }

    #[tokio::test]
    async fn test_disk_panel_prepares_and_commits() {
        let panel = FilePanel::new("left", PanelBinding::Disk { path: "/home".into() });
        assert!(panel.prepare_release(false).await);
        assert!(!panel.navigate(PanelBinding::Disk { path: "/tmp".into() }));

        panel.commit().await;
        assert_eq!(panel.release_state(), ReleaseState::Released);
        assert_eq!(panel.binding(), PanelBinding::Detached);
    }

    #[tokio::test]
    async fn test_pending_archive_update_refuses_unless_forced() {
        let panel = archive_panel(true);
        assert!(!panel.prepare_release(false).await);
        assert_eq!(panel.release_state(), ReleaseState::Bound);
        assert!(panel.prepare_release(true).await);
    }

    #[tokio::test]
    async fn test_rollback_keeps_binding() {
        let panel = archive_panel(false);
        assert!(panel.prepare_release(false).await);
        panel.rollback().await;

        assert_eq!(panel.release_state(), ReleaseState::Bound);
        assert!(matches!(panel.binding(), PanelBinding::Archive { .. }));
        assert!(panel.navigate(PanelBinding::Disk { path: "/".into() }));
    }

    #[tokio::test]
    async fn test_force_detach_from_extension_fs() {
        let panel = FilePanel::new(
            "left",
            PanelBinding::ExtensionFs {
                extension: "ftp".to_string(),
                path: "/pub".to_string(),
                can_detach: false,
            },
        );
        assert!(!panel.prepare_release(false).await);
        panel.force_detach().await;
        assert_eq!(panel.binding(), PanelBinding::Detached);
        assert_eq!(panel.release_state(), ReleaseState::Released);
    }
}
