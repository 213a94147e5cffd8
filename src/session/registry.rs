//! Registry of open sessions

use std::sync::{Arc, Mutex};

use crate::core::sync::recover_mutex_poison;
use crate::session::{ClosableSession, SessionKind};

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<Vec<Arc<dyn ClosableSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<dyn ClosableSession>) {
        log::debug!("Registered {}", session.label());
        recover_mutex_poison(self.sessions.lock(), "session registry").push(session);
    }

    /// Drop sessions that are no longer open
    pub fn prune_closed(&self) -> usize {
        let mut sessions = recover_mutex_poison(self.sessions.lock(), "session registry");
        let before = sessions.len();
        sessions.retain(|session| session.is_open());
        before - sessions.len()
    }

    pub fn open_count(&self) -> usize {
        recover_mutex_poison(self.sessions.lock(), "session registry")
            .iter()
            .filter(|session| session.is_open())
            .count()
    }

    /// Open sessions of one group, in registration order
    pub fn open_of_kind(&self, kind: SessionKind) -> Vec<Arc<dyn ClosableSession>> {
        recover_mutex_poison(self.sessions.lock(), "session registry")
            .iter()
            .filter(|session| session.kind() == kind && session.is_open())
            .cloned()
            .collect()
    }

    /// Close groups in order: searches first, then viewers
    pub fn close_groups(&self) -> Vec<(SessionKind, Vec<Arc<dyn ClosableSession>>)> {
        [SessionKind::Search, SessionKind::Viewer]
            .into_iter()
            .map(|kind| (kind, self.open_of_kind(kind)))
            .filter(|(_, sessions)| !sessions.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::handle::{SessionDelegate, SessionHandle};
    use async_trait::async_trait;

    struct Quiet;

    #[async_trait]
    impl SessionDelegate for Quiet {
        async fn may_close(&mut self, _force_no_prompt: bool) -> bool {
            true
        }

        async fn teardown(&mut self) {}
    }

    #[tokio::test]
    async fn test_groups_put_searches_first() {
        let registry = SessionRegistry::new();
        registry.register(SessionHandle::spawn("v1", SessionKind::Viewer, Box::new(Quiet)));
        registry.register(SessionHandle::spawn("s1", SessionKind::Search, Box::new(Quiet)));
        registry.register(SessionHandle::spawn("v2", SessionKind::Viewer, Box::new(Quiet)));

        let groups = registry.close_groups();
        let names: Vec<Vec<String>> = groups
            .iter()
            .map(|(_, sessions)| sessions.iter().map(|s| s.name().to_string()).collect())
            .collect();
        assert_eq!(groups[0].0, SessionKind::Search);
        assert_eq!(names, vec![vec!["s1"], vec!["v1", "v2"]]);
    }

    #[tokio::test]
    async fn test_prune_closed() {
        let registry = SessionRegistry::new();
        let viewer = SessionHandle::spawn("v1", SessionKind::Viewer, Box::new(Quiet));
        registry.register(viewer.clone());
        assert_eq!(registry.open_count(), 1);

        viewer.close().await;
        assert_eq!(registry.open_count(), 0);
        assert_eq!(registry.prune_closed(), 1);
        assert!(registry.close_groups().is_empty());
    }
}
