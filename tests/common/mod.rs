//! Common test utilities and helpers

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use endsession::app::console_host::ConsoleHost;
use endsession::app::startup::Application;

/// Start an application rooted in `dir` with a host that never prompts
pub async fn start_app(dir: &tempfile::TempDir) -> Application {
    let host = Arc::new(ConsoleHost::with_interaction(false, false));
    Application::start(dir.path().join("Endsession"), host)
        .await
        .expect("application starts")
}

/// Write `len` bytes of patterned data to `dir/name`
pub fn write_file(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).expect("fixture written");
    path
}
