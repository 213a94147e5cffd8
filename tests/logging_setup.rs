//! Global logger setup; these tests share the process-wide logger

use endsession::core::logging::{init_logging, set_log_level};
use serial_test::serial;
use std::sync::Once;

static INIT: Once = Once::new();

fn ensure_logger() {
    INIT.call_once(|| {
        init_logging(Some("info"), Some("json"), None, false).expect("logger starts");
    });
}

#[test]
#[serial]
fn test_level_changes_at_runtime() {
    ensure_logger();
    set_log_level("debug").unwrap();
    log::debug!("debug output enabled");
    set_log_level("warn").unwrap();
}

#[test]
#[serial]
fn test_module_specific_level() {
    ensure_logger();
    set_log_level("warn, endsession::shutdown = trace").unwrap();
    log::warn!(target: "endsession::shutdown::coordinator", "visible");
    set_log_level("info").unwrap();
}
