use std::sync::atomic::Ordering;
use std::time::Duration;

use super::mocks::{MockSession, PluginBehavior, Rig};
use crate::session::SessionKind;
use crate::shutdown::types::{ShutdownKind, ShutdownOutcome};
use strum::IntoEnumIterator;

#[tokio::test(start_paused = true)]
async fn test_query_never_closes_accepting_sessions() {
    let rig = Rig::new();
    let search = MockSession::new(&rig.journal, "find", SessionKind::Search, true);
    let viewer = MockSession::new(&rig.journal, "readme", SessionKind::Viewer, true);
    let rig = rig.with_session(search).with_session(viewer);
    let mut coordinator = rig.coordinator();

    assert!(coordinator.os_query_end_session(false, None).await);
    assert!(coordinator.os_query_end_session(false, None).await);

    assert_eq!(rig.sessions.open_count(), 2);
    assert_eq!(rig.journal.count("session.find.query"), 1);
    assert_eq!(rig.journal.count("session.readme.query"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_veto_leaves_process_running_without_partial_commit() {
    for kind in ShutdownKind::iter().filter(|k| !k.is_critical()) {
        let rig = Rig::new().with_plugins(PluginBehavior::Refuse);
        let mut coordinator = rig.coordinator();

        let report = coordinator
            .handle(crate::shutdown::ShutdownRequest::new(kind, None))
            .await;

        assert!(
            matches!(report.outcome, ShutdownOutcome::Rejected(_)),
            "{} should be vetoed",
            kind
        );
        assert_eq!(rig.commits(), 0, "{} committed a panel", kind);
        assert_eq!(rig.destroyed(), 0);
        assert!(!coordinator.is_terminated());
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_veto_stops_before_later_groups() {
    let rig = Rig::new();
    let search = MockSession::new(&rig.journal, "find", SessionKind::Search, false);
    let viewer = MockSession::new(&rig.journal, "readme", SessionKind::Viewer, true);
    let rig = rig.with_session(search).with_session(viewer);
    let mut coordinator = rig.coordinator();

    let report = coordinator.user_close_requested().await;

    assert!(matches!(report.outcome, ShutdownOutcome::Rejected(_)));
    assert_eq!(rig.journal.count("session.readme.query"), 0);
    assert_eq!(rig.sessions.open_count(), 2);
    assert_eq!(rig.journal.count("plugins.unload"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_critical_end_meets_budget_despite_slow_collaborators() {
    let rig = Rig::new().with_disk_jobs(3).with_plugins(PluginBehavior::Hang);
    rig.disk.stubborn.store(true, Ordering::SeqCst);
    *rig.store.backup_delay.lock().unwrap() = Duration::from_secs(60);
    let rig = {
        let slow = MockSession::answering_after(
            &rig.journal,
            "scan",
            SessionKind::Search,
            false,
            Duration::from_secs(60),
        );
        rig.with_session(slow)
    };
    let mut coordinator = rig.coordinator();

    let report = coordinator.os_end_session(true, Some(2000)).await;

    assert_eq!(report.outcome, ShutdownOutcome::Terminated);
    assert!(report.elapsed <= Duration::from_millis(2000));
    assert_eq!(rig.destroyed(), 1);
    assert!(!report.degradations.is_empty());
    assert_eq!(rig.host.notices.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_critical_end_meets_budget_with_hung_panel() {
    let rig = Rig::new().with_hung_panel("archive");
    let mut coordinator = rig.coordinator();

    let report = coordinator.os_end_session(true, Some(5000)).await;

    assert_eq!(report.outcome, ShutdownOutcome::Terminated);
    assert!(report.elapsed <= Duration::from_millis(5000), "{:?}", report.elapsed);
    assert_eq!(rig.destroyed(), 1);
    assert_eq!(rig.journal.count("panel.archive.prepare"), 1);
    assert!(!report.degradations.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backup_finishes_before_save() {
    let rig = Rig::new();
    *rig.store.backup_delay.lock().unwrap() = Duration::from_millis(800);
    let mut coordinator = rig.coordinator();

    let report = coordinator.os_end_session(true, Some(5000)).await;

    assert!(report.config_saved);
    assert_eq!(report.backup_verified, Some(true));
    let done = rig.journal.position("store.backup.done").unwrap();
    let save = rig.journal.position("store.save").unwrap();
    assert!(done < save);
}

#[tokio::test(start_paused = true)]
async fn test_backup_cut_off_by_deadline_skips_save() {
    let rig = Rig::new();
    *rig.store.backup_delay.lock().unwrap() = Duration::from_secs(30);
    let mut coordinator = rig.coordinator();

    let report = coordinator.os_end_session(true, Some(3000)).await;

    assert_eq!(report.outcome, ShutdownOutcome::Terminated);
    assert_eq!(rig.journal.count("store.save"), 0);
    assert_eq!(report.backup_verified, Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_searches_close_before_viewers() {
    let rig = Rig::new();
    let viewer = MockSession::new(&rig.journal, "readme", SessionKind::Viewer, true);
    let first = MockSession::new(&rig.journal, "find-a", SessionKind::Search, true);
    let second = MockSession::new(&rig.journal, "find-b", SessionKind::Search, true);
    // registration order must not matter
    let rig = rig.with_session(viewer).with_session(first).with_session(second);
    let mut coordinator = rig.coordinator();

    let report = coordinator.user_close_requested().await;
    assert!(report.outcome.is_terminated());

    let viewer_query = rig.journal.position("session.readme.query").unwrap();
    let viewer_close = rig.journal.position("session.readme.close").unwrap();
    for search in ["find-a", "find-b"] {
        let closed = rig
            .journal
            .position(&format!("session.{}.close", search))
            .unwrap();
        assert!(closed < viewer_query);
        assert!(closed < viewer_close);
    }
}

#[tokio::test(start_paused = true)]
async fn test_critical_force_close_keeps_group_order() {
    let rig = Rig::new();
    let viewer = MockSession::new(&rig.journal, "readme", SessionKind::Viewer, false);
    let search = MockSession::new(&rig.journal, "find", SessionKind::Search, false);
    let rig = rig.with_session(viewer).with_session(search);
    let mut coordinator = rig.coordinator();

    coordinator.os_end_session(true, None).await;

    assert_eq!(rig.sessions.open_count(), 0);
    assert!(rig.journal.position("session.find.close") < rig.journal.position("session.readme.close"));
}

#[tokio::test(start_paused = true)]
async fn test_session_triggers_pump_events_while_waiting() {
    let rig = Rig::new();
    let slow = MockSession::answering_after(
        &rig.journal,
        "find",
        SessionKind::Search,
        true,
        Duration::from_millis(400),
    );
    let rig = rig.with_session(slow);
    let mut coordinator = rig.coordinator();

    assert!(coordinator.os_query_end_session(false, None).await);
    assert!(rig.host.pumps.load(Ordering::SeqCst) > 0);
}

#[tokio::test(start_paused = true)]
async fn test_user_close_does_not_pump_events() {
    let rig = Rig::new();
    let slow = MockSession::answering_after(
        &rig.journal,
        "find",
        SessionKind::Search,
        true,
        Duration::from_millis(400),
    );
    let rig = rig.with_session(slow);
    let mut coordinator = rig.coordinator();

    assert!(coordinator.user_close_requested().await.outcome.is_terminated());
    assert_eq!(rig.host.pumps.load(Ordering::SeqCst), 0);
}
