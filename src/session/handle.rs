//! Session actor
//!
//! Each session runs as its own task and receives close queries and the final
//! close over a channel. The handle shared with the rest of the application
//! only sees the close-query state and an "open" flag.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use crate::core::sync::recover_mutex_poison;
use crate::session::{ClosableSession, SessionKind};
use crate::shutdown::types::CloseQueryState;

/// Session-specific behaviour driven by the actor loop
#[async_trait]
pub trait SessionDelegate: Send {
    /// Decide whether the session may close; may prompt unless `force_no_prompt`
    async fn may_close(&mut self, force_no_prompt: bool) -> bool;

    /// Release everything the session owns
    async fn teardown(&mut self);
}

enum SessionCommand {
    QueryClose { force_no_prompt: bool },
    Close { done: oneshot::Sender<()> },
}

pub struct SessionHandle {
    name: String,
    kind: SessionKind,
    query: Arc<Mutex<CloseQueryState>>,
    open: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Start the session task and return its shared handle
    pub fn spawn(
        name: impl Into<String>,
        kind: SessionKind,
        delegate: Box<dyn SessionDelegate>,
    ) -> Arc<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = Arc::new(Self {
            name: name.into(),
            kind,
            query: Arc::new(Mutex::new(CloseQueryState::NotAsked)),
            open: Arc::new(AtomicBool::new(true)),
            commands,
        });

        tokio::spawn(run_session(
            handle.name.clone(),
            delegate,
            receiver,
            Arc::clone(&handle.query),
            Arc::clone(&handle.open),
        ));
        handle
    }

    fn set_query_state(&self, state: CloseQueryState) {
        *recover_mutex_poison(self.query.lock(), &self.name) = state;
    }
}

async fn run_session(
    name: String,
    mut delegate: Box<dyn SessionDelegate>,
    mut receiver: mpsc::UnboundedReceiver<SessionCommand>,
    query: Arc<Mutex<CloseQueryState>>,
    open: Arc<AtomicBool>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            SessionCommand::QueryClose { force_no_prompt } => {
                let allowed = delegate.may_close(force_no_prompt).await;
                let mut state = recover_mutex_poison(query.lock(), &name);
                // the requester may have given up and reset the query meanwhile
                if *state == CloseQueryState::Sent {
                    *state = if allowed {
                        CloseQueryState::Accepted
                    } else {
                        CloseQueryState::Rejected
                    };
                }
                log::debug!("Session '{}' answered close query: {}", name, *state);
            }
            SessionCommand::Close { done } => {
                delegate.teardown().await;
                open.store(false, Ordering::Release);
                log::debug!("Session '{}' closed", name);
                let _ = done.send(());
                return;
            }
        }
    }
    // every handle dropped
    delegate.teardown().await;
    open.store(false, Ordering::Release);
}

#[async_trait]
impl ClosableSession for SessionHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SessionKind {
        self.kind
    }

    fn close_query_state(&self) -> CloseQueryState {
        *recover_mutex_poison(self.query.lock(), &self.name)
    }

    fn request_close(&self, force_no_prompt: bool) -> bool {
        let mut state = recover_mutex_poison(self.query.lock(), &self.name);
        if *state != CloseQueryState::NotAsked {
            return false;
        }
        *state = CloseQueryState::Sent;
        if self
            .commands
            .send(SessionCommand::QueryClose { force_no_prompt })
            .is_err()
        {
            // task already gone: nothing left to refuse
            *state = CloseQueryState::Accepted;
        }
        true
    }

    fn finish_close_query(&self) {
        self.set_query_state(CloseQueryState::NotAsked);
    }

    async fn close(&self) {
        if !self.is_open() {
            return;
        }
        let (done, finished) = oneshot::channel();
        if self.commands.send(SessionCommand::Close { done }).is_ok() {
            let _ = finished.await;
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Scripted {
        allow: bool,
        torn_down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SessionDelegate for Scripted {
        async fn may_close(&mut self, _force_no_prompt: bool) -> bool {
            self.allow
        }

        async fn teardown(&mut self) {
            self.torn_down.store(true, Ordering::SeqCst);
        }
    }

    fn scripted(allow: bool) -> (Arc<SessionHandle>, Arc<AtomicBool>) {
        let torn_down = Arc::new(AtomicBool::new(false));
        let handle = SessionHandle::spawn(
            "report.txt",
            SessionKind::Viewer,
            Box::new(Scripted {
                allow,
                torn_down: torn_down.clone(),
            }),
        );
        (handle, torn_down)
    }

    async fn wait_resolved(handle: &SessionHandle) -> CloseQueryState {
        for _ in 0..100 {
            let state = handle.close_query_state();
            if state.is_resolved() {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.close_query_state()
    }

    #[tokio::test]
    async fn test_query_resolves_to_accepted() {
        let (handle, _) = scripted(true);
        assert!(handle.request_close(false));
        assert_eq!(wait_resolved(&handle).await, CloseQueryState::Accepted);

        handle.finish_close_query();
        assert_eq!(handle.close_query_state(), CloseQueryState::NotAsked);
    }

    #[tokio::test]
    async fn test_second_request_joins_in_flight_query() {
        let (handle, _) = scripted(false);
        assert!(handle.request_close(false));
        assert!(!handle.request_close(false));
        assert_eq!(wait_resolved(&handle).await, CloseQueryState::Rejected);
    }

    #[tokio::test]
    async fn test_close_runs_teardown_once() {
        let (handle, torn_down) = scripted(true);
        handle.close().await;
        assert!(!handle.is_open());
        assert!(torn_down.load(Ordering::SeqCst));

        // second close is a no-op
        handle.close().await;
        assert_eq!(handle.label(), "viewer 'report.txt'");
    }
}
