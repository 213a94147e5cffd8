//! Closable sessions
//!
//! Long-lived windows (running searches, file viewers) that must agree before
//! the application closes. Each one keeps a close-query state so concurrent
//! "may I close?" questions collapse into one.

pub mod delegates;
pub mod handle;
pub mod registry;

pub use delegates::{SearchDelegate, ViewerDelegate};
pub use handle::{SessionDelegate, SessionHandle};
pub use registry::SessionRegistry;

use async_trait::async_trait;
use strum_macros::Display;

use crate::shutdown::types::CloseQueryState;

/// Close order groups: every search closes before any viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum SessionKind {
    #[strum(serialize = "search")]
    Search,
    #[strum(serialize = "viewer")]
    Viewer,
}

#[async_trait]
pub trait ClosableSession: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SessionKind;

    fn close_query_state(&self) -> CloseQueryState;

    /// Post "may I close?" if no query is in flight
    ///
    /// Moves `NotAsked` to `Sent` and returns true. Returns false without
    /// posting when another requester already holds the query; that requester
    /// resets it.
    fn request_close(&self, force_no_prompt: bool) -> bool;

    /// Return the state to `NotAsked` once the answer has been read
    fn finish_close_query(&self);

    /// Tear the session down; idempotent
    async fn close(&self);

    fn is_open(&self) -> bool;

    fn label(&self) -> String {
        format!("{} '{}'", self.kind(), self.name())
    }
}
