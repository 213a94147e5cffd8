//! Shutdown coordinator
//!
//! One coordinator exists per process. Every trigger becomes an immutable
//! [`ShutdownRequest`] and walks the phase table below. Negotiated runs stop
//! at the first veto; a critical session end records failures and keeps
//! going until the root window is destroyed.
//!
//! ```text
//! Validating -> [ConfirmingWithUser] -> CancelingDiskOps -> ClosingSessions
//!   -> UnloadingPlugins -> ReleasingPanelResources -> PersistingConfiguration
//!   -> Terminated
//! ```
//!
//! A session query stops after ReleasingPanelResources and returns to Idle
//! with its answer cached. A critical run whose guards failed only cancels
//! disk jobs before terminating.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{AppSettings, ConfigError, ConfigurationStore, SharedSettings, ShutdownSettings};
use crate::core::poll::{EventPump, PollOutcome};
use crate::core::sync::handle_rwlock_read;
use crate::diskops::{wait_until_idle, DiskOperationSupervisor};
use crate::panel::PanelResourceManager;
use crate::plugin::PluginRuntime;
use crate::session::SessionRegistry;
use crate::shutdown::deadline::Deadline;
use crate::shutdown::error::{GuardKind, PersistStage, ShutdownError};
use crate::shutdown::guarded::{guarded, guarded_sync, CallFailure};
use crate::shutdown::guards::GuardState;
use crate::shutdown::host::{BlockReason, DegradationNotice, DiskJobsDecision, HostPump, HostShell};
use crate::shutdown::negotiation::{close_negotiated, force_close};
use crate::shutdown::types::{
    ArrivedTrigger, Phase, Policy, ShutdownKind, ShutdownOutcome, ShutdownReport, ShutdownRequest,
    ShutdownTrigger, UiParent,
};

const CONFIRM_PROMPT: &str = "Do you want to close the application?";
const DISK_JOBS_PROMPT: &str = "Disk operations are still running";
/// Longest a host notice may hold up a critical run
const NOTICE_LIMIT: Duration = Duration::from_secs(1);

/// Subsystems the coordinator drives
#[derive(Clone)]
pub struct Participants {
    pub disk_ops: Arc<dyn DiskOperationSupervisor>,
    pub sessions: Arc<SessionRegistry>,
    pub plugins: Arc<dyn PluginRuntime>,
    pub panels: Vec<Arc<dyn PanelResourceManager>>,
    pub config: Arc<dyn ConfigurationStore>,
}

enum Step {
    Continue,
    Reject(ShutdownError),
}

/// State of one run through the phase table
struct Run {
    kind: ShutdownKind,
    policy: Policy,
    deadline: Deadline,
    timing: ShutdownSettings,
    confirm_on_close: bool,
    auto_save: bool,
    started: Instant,
    cleanup_only: bool,
    announced: bool,
    path: Vec<Phase>,
    degradations: Vec<ShutdownError>,
    rejection: Option<ShutdownError>,
    config_saved: bool,
    backup_verified: Option<bool>,
}

impl Run {
    fn new(request: &ShutdownRequest, settings: AppSettings) -> Self {
        let kind = request.kind();
        let timing = settings.shutdown;
        let deadline = match (kind.is_critical(), request.budget()) {
            (true, budget) => Deadline::new(
                request.arrival(),
                Some(budget.unwrap_or_else(|| timing.critical_budget())),
                timing.safety_margin(),
            ),
            (false, Some(budget)) => {
                Deadline::new(request.arrival(), Some(budget), timing.safety_margin())
            }
            (false, None) => Deadline::unbounded(request.arrival()),
        };
        Self {
            kind,
            policy: kind.policy(),
            deadline,
            timing,
            confirm_on_close: settings.confirm_on_close,
            auto_save: settings.auto_save,
            started: request.arrival(),
            cleanup_only: false,
            announced: false,
            path: Vec::new(),
            degradations: Vec::new(),
            rejection: None,
            config_saved: false,
            backup_verified: None,
        }
    }

    fn record(&mut self, error: ShutdownError) {
        log::warn!("{} degraded: {}", self.kind, error);
        self.degradations.push(error);
    }

    /// Reject under a negotiated policy, record and continue otherwise
    fn fail(&mut self, error: ShutdownError) -> Step {
        if error.blocks(self.policy) {
            Step::Reject(error)
        } else {
            self.record(error);
            Step::Continue
        }
    }

    fn asks_confirmation(&self) -> bool {
        self.kind.asks_confirmation() && self.confirm_on_close
    }

    fn ui_parent(&self) -> UiParent {
        if self.kind.is_session_trigger() {
            UiParent::ShutdownProgress
        } else {
            UiParent::MainWindow
        }
    }
}

/// Phase transition table
fn next_phase(
    phase: Phase,
    rejected: bool,
    cleanup_only: bool,
    asks_confirmation: bool,
    evaluate_only: bool,
) -> Phase {
    if rejected {
        return Phase::Rejected;
    }
    match phase {
        Phase::Idle => Phase::Validating,
        Phase::Validating if cleanup_only => Phase::CancelingDiskOps,
        Phase::Validating if asks_confirmation => Phase::ConfirmingWithUser,
        Phase::Validating | Phase::ConfirmingWithUser => Phase::CancelingDiskOps,
        Phase::CancelingDiskOps if cleanup_only => Phase::Terminated,
        Phase::CancelingDiskOps => Phase::ClosingSessions,
        Phase::ClosingSessions => Phase::UnloadingPlugins,
        Phase::UnloadingPlugins => Phase::ReleasingPanelResources,
        Phase::ReleasingPanelResources if evaluate_only => Phase::Idle,
        Phase::ReleasingPanelResources => Phase::PersistingConfiguration,
        Phase::PersistingConfiguration => Phase::Terminated,
        Phase::Terminated | Phase::Rejected => phase,
    }
}

pub struct ShutdownCoordinator {
    participants: Participants,
    host: Arc<dyn HostShell>,
    guards: Arc<GuardState>,
    settings: SharedSettings,
    phase: Phase,
    root_destroyed: bool,
    cached_query: Option<ShutdownReport>,
    forced_notice_shown: bool,
}

impl ShutdownCoordinator {
    pub fn new(
        participants: Participants,
        host: Arc<dyn HostShell>,
        guards: Arc<GuardState>,
        settings: SharedSettings,
    ) -> Self {
        Self {
            participants,
            host,
            guards,
            settings,
            phase: Phase::Idle,
            root_destroyed: false,
            cached_query: None,
            forced_notice_shown: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        self.root_destroyed
    }

    pub async fn dispatch(&mut self, trigger: ShutdownTrigger) -> ShutdownReport {
        self.dispatch_arrived(trigger.arrived_now()).await
    }

    /// Dispatch a trigger whose budget started running when it was received
    pub async fn dispatch_arrived(&mut self, arrived: ArrivedTrigger) -> ShutdownReport {
        match arrived.request() {
            Some(request) => self.handle(request).await,
            None => {
                self.os_session_canceled();
                ShutdownReport::ignored(None)
            }
        }
    }

    pub async fn user_close_requested(&mut self) -> ShutdownReport {
        self.dispatch(ShutdownTrigger::UserCloseRequested).await
    }

    pub async fn forced_close_requested(&mut self) -> ShutdownReport {
        self.dispatch(ShutdownTrigger::ForcedCloseRequested).await
    }

    /// Answer an OS query; a critical query cannot be refused and ends the process
    pub async fn os_query_end_session(
        &mut self,
        critical: bool,
        remaining_budget_ms: Option<u64>,
    ) -> bool {
        if self.root_destroyed {
            return true;
        }
        let report = self
            .dispatch(ShutdownTrigger::QueryEndSession {
                critical,
                remaining_budget_ms,
            })
            .await;
        critical || report.outcome.allows_close()
    }

    pub async fn os_end_session(&mut self, critical: bool, budget_ms: Option<u64>) -> ShutdownReport {
        self.dispatch(ShutdownTrigger::EndSession {
            critical,
            budget_ms,
        })
        .await
    }

    /// The OS reported that the announced session end did not happen
    pub fn os_session_canceled(&mut self) {
        if self.cached_query.take().is_some() {
            log::debug!("Session end canceled; cleared cached query answer");
        }
    }

    pub async fn handle(&mut self, request: ShutdownRequest) -> ShutdownReport {
        let kind = request.kind();
        if self.root_destroyed {
            log::debug!("Ignoring {}: already terminated", kind);
            return ShutdownReport::ignored(Some(kind));
        }
        if kind.is_evaluation_only() {
            if let Some(cached) = &self.cached_query {
                log::debug!("Answering repeated session query from cache");
                let mut report = cached.clone();
                report.from_cache = true;
                report.elapsed = Duration::ZERO;
                return report;
            }
        } else {
            self.cached_query = None;
        }

        let settings = self.settings_snapshot();
        let mut run = Run::new(&request, settings);
        log::info!("Shutdown requested: {}", kind);

        let mut phase = Phase::Validating;
        loop {
            self.enter(&mut run, phase).await;
            if phase.is_terminal() || phase == Phase::Idle {
                break;
            }
            let step = match phase {
                Phase::Validating => self.validate(&mut run).await,
                Phase::ConfirmingWithUser => self.confirm(&mut run).await,
                Phase::CancelingDiskOps => self.cancel_disk_ops(&mut run).await,
                Phase::ClosingSessions => self.close_sessions(&mut run).await,
                Phase::UnloadingPlugins => self.unload_plugins(&mut run).await,
                Phase::ReleasingPanelResources => self.release_panels(&mut run).await,
                Phase::PersistingConfiguration => self.persist(&mut run).await,
                Phase::Idle | Phase::Terminated | Phase::Rejected => Step::Continue,
            };
            let rejected = match step {
                Step::Reject(error) => {
                    log::info!("{} rejected during {}: {}", kind, phase, error);
                    run.rejection = Some(error);
                    true
                }
                Step::Continue => false,
            };
            phase = next_phase(
                phase,
                rejected,
                run.cleanup_only,
                run.asks_confirmation(),
                kind.is_evaluation_only(),
            );
        }

        let outcome = match (phase, run.rejection.take()) {
            (Phase::Terminated, _) => ShutdownOutcome::Terminated,
            (Phase::Rejected, Some(error)) => ShutdownOutcome::Rejected(error),
            _ => ShutdownOutcome::Allowed,
        };
        let report = ShutdownReport {
            kind: Some(kind),
            outcome,
            path: run.path,
            degradations: run.degradations,
            cleanup_only: run.cleanup_only,
            config_saved: run.config_saved,
            backup_verified: run.backup_verified,
            from_cache: false,
            elapsed: run.started.elapsed(),
        };
        if kind.is_evaluation_only() {
            self.cached_query = Some(report.clone());
        }
        report
    }

    fn settings_snapshot(&self) -> AppSettings {
        match handle_rwlock_read(self.settings.read(), |message| ConfigError::Lock { message }) {
            Ok(settings) => settings.clone(),
            Err(e) => {
                log::warn!("{}; using default shutdown settings", e);
                AppSettings::default()
            }
        }
    }

    async fn enter(&mut self, run: &mut Run, phase: Phase) {
        log::debug!("{}: entering {}", run.kind, phase);
        run.path.push(phase);
        self.phase = phase;
        match phase {
            Phase::Terminated => self.terminate(),
            Phase::Rejected => self.after_rejection(run).await,
            _ => {}
        }
    }

    fn pump_for<'a>(&self, run: &Run, pump: &'a HostPump<'a>) -> Option<&'a dyn EventPump> {
        if run.kind.pumps_events() {
            Some(pump)
        } else {
            None
        }
    }

    fn block_reason(&self, run: &Run, reason: Option<BlockReason>) {
        if run.kind.is_session_trigger() {
            let _ = guarded_sync("host", "set block reason", || self.host.set_block_reason(reason));
        }
    }

    async fn validate(&self, run: &mut Run) -> Step {
        let failures = self.guards.snapshot().failures(run.kind);
        if let Some(&first) = failures.first() {
            if run.policy == Policy::Negotiated {
                return Step::Reject(ShutdownError::ResourceBusy { guard: first });
            }
            for &guard in &failures {
                run.record(ShutdownError::ResourceBusy { guard });
            }
            run.cleanup_only = true;
        }
        if run.kind.is_critical() {
            self.announce(run, failures).await;
        }
        Step::Continue
    }

    /// Tell the user once what a critical shutdown is about to discard
    async fn announce(&self, run: &mut Run, failed_guards: Vec<GuardKind>) {
        let disk_ops = Arc::clone(&self.participants.disk_ops);
        let notice = DegradationNotice {
            kind: run.kind,
            active_jobs: guarded_sync("disk jobs", "count", || disk_ops.active_job_count())
                .unwrap_or(0),
            open_sessions: if run.cleanup_only {
                0
            } else {
                self.participants.sessions.open_count()
            },
            failed_guards,
            cleanup_only: run.cleanup_only,
        };
        if notice.is_empty() || run.announced {
            return;
        }
        run.announced = true;
        log::warn!(
            "Critical shutdown: {} disk jobs, {} open sessions will be interrupted",
            notice.active_jobs,
            notice.open_sessions
        );
        let limit = run.deadline.call_limit(Some(NOTICE_LIMIT));
        if let Err(failure) = guarded(
            "host",
            "announce degradation",
            limit,
            self.host.announce_degradation(&notice),
        )
        .await
        {
            run.record(failure.into_error("host", "announce degradation"));
        }
    }

    async fn confirm(&self, _run: &mut Run) -> Step {
        match guarded("host", "confirm close", None, self.host.confirm_close()).await {
            Ok(true) => Step::Continue,
            Ok(false) => Step::Reject(ShutdownError::UserDeclined {
                prompt: CONFIRM_PROMPT.to_string(),
            }),
            Err(failure) => Step::Reject(failure.into_error("host", "confirm close")),
        }
    }

    async fn wait_for_disk(&self, run: &Run, ceiling: Duration) -> Result<PollOutcome, CallFailure> {
        let pump = HostPump(self.host.as_ref());
        let disk_ops = Arc::clone(&self.participants.disk_ops);
        guarded(
            "disk jobs",
            "wait",
            None,
            wait_until_idle(
                disk_ops.as_ref(),
                run.timing.disk_poll_interval(),
                ceiling,
                self.pump_for(run, &pump),
            ),
        )
        .await
    }

    async fn cancel_disk_ops(&self, run: &mut Run) -> Step {
        let disk_ops = Arc::clone(&self.participants.disk_ops);
        let active = match guarded_sync("disk jobs", "count", || disk_ops.active_job_count()) {
            Ok(active) => active,
            Err(failure) => return run.fail(failure.into_error("disk jobs", "count")),
        };
        if active == 0 {
            return Step::Continue;
        }

        if run.policy == Policy::BestEffort {
            log::warn!("Canceling {} disk jobs without asking", active);
            if let Err(failure) = guarded_sync("disk jobs", "cancel", || disk_ops.cancel_all()) {
                run.record(failure.into_error("disk jobs", "cancel"));
            }
            let ceiling = run.deadline.ceiling(Duration::MAX, run.timing.disk_wait_margin());
            match self.wait_for_disk(run, ceiling).await {
                Ok(PollOutcome::Ready) => {}
                Ok(PollOutcome::TimedOut) => {
                    log::warn!("Abandoning disk jobs still running after {:?}", ceiling);
                    run.record(ShutdownError::timed_out("disk jobs", ceiling));
                }
                Err(failure) => run.record(failure.into_error("disk jobs", "wait")),
            }
            return Step::Continue;
        }

        self.block_reason(run, Some(BlockReason::DiskOperations));
        let decision = guarded(
            "host",
            "disk jobs dialog",
            None,
            self.host.disk_jobs_dialog(active),
        )
        .await;
        let ceiling = run
            .deadline
            .ceiling(run.timing.disk_cancel_cap(), run.timing.disk_wait_margin());
        let step = match decision {
            Ok(DiskJobsDecision::Decline) => Step::Reject(ShutdownError::UserDeclined {
                prompt: DISK_JOBS_PROMPT.to_string(),
            }),
            Ok(decision) => {
                if decision == DiskJobsDecision::CancelAndContinue {
                    if let Err(failure) =
                        guarded_sync("disk jobs", "cancel", || disk_ops.cancel_all())
                    {
                        return run.fail(failure.into_error("disk jobs", "cancel"));
                    }
                }
                match self.wait_for_disk(run, ceiling).await {
                    Ok(PollOutcome::Ready) => Step::Continue,
                    Ok(PollOutcome::TimedOut) => {
                        run.fail(ShutdownError::timed_out("disk jobs", ceiling))
                    }
                    Err(failure) => run.fail(failure.into_error("disk jobs", "wait")),
                }
            }
            Err(failure) => Step::Reject(failure.into_error("host", "disk jobs dialog")),
        };
        self.block_reason(run, None);
        step
    }

    async fn close_sessions(&self, run: &mut Run) -> Step {
        let registry = &self.participants.sessions;
        registry.prune_closed();
        let groups = registry.close_groups();
        if groups.is_empty() {
            return Step::Continue;
        }

        if run.policy == Policy::BestEffort {
            let ceiling = run
                .deadline
                .ceiling(run.timing.session_close_grace(), Duration::ZERO);
            force_close(groups, ceiling).await;
            return Step::Continue;
        }

        self.block_reason(run, Some(BlockReason::Sessions));
        let pump = HostPump(self.host.as_ref());
        let result = close_negotiated(
            &groups,
            &run.timing,
            run.kind.is_evaluation_only(),
            &run.deadline,
            self.pump_for(run, &pump),
        )
        .await;
        self.block_reason(run, None);

        match result {
            Ok(closed) => {
                log::debug!("Closed {} sessions", closed);
                registry.prune_closed();
                Step::Continue
            }
            Err(error) => run.fail(error),
        }
    }

    async fn unload_plugins(&self, run: &mut Run) -> Step {
        let plugins = Arc::clone(&self.participants.plugins);
        match guarded_sync("extensions", "count", || plugins.loaded_count()) {
            Ok(0) => return Step::Continue,
            Ok(_) => {}
            Err(failure) => return run.fail(failure.into_error("extensions", "count")),
        }
        let limit = run.deadline.call_limit(None);

        if run.kind.is_evaluation_only() {
            return match guarded("extensions", "unload probe", limit, plugins.can_unload_all())
                .await
            {
                Ok(true) => Step::Continue,
                Ok(false) => run.fail(ShutdownError::vetoed("extensions", "cannot unload now")),
                Err(failure) => run.fail(failure.into_error("extensions", "unload probe")),
            };
        }

        if run.policy == Policy::BestEffort && run.deadline.is_expired() {
            run.record(ShutdownError::timed_out("extensions unload", Duration::ZERO));
            return Step::Continue;
        }
        let force = run.policy == Policy::BestEffort;
        match guarded(
            "extensions",
            "unload",
            limit,
            plugins.try_unload_all(run.ui_parent(), force),
        )
        .await
        {
            Ok(true) => Step::Continue,
            Ok(false) => run.fail(ShutdownError::vetoed("extensions", "a module refused to unload")),
            Err(failure) => run.fail(failure.into_error("extensions", "unload")),
        }
    }

    async fn rollback(&self, prepared: &[Arc<dyn PanelResourceManager>]) {
        for panel in prepared.iter().rev() {
            let name = format!("panel '{}'", panel.name());
            let _ = guarded(&name, "rollback", None, panel.rollback()).await;
        }
    }

    async fn release_panels(&self, run: &mut Run) -> Step {
        let panels = self.participants.panels.clone();

        if run.policy == Policy::BestEffort {
            for panel in &panels {
                let name = format!("panel '{}'", panel.name());
                let prepared = !run.deadline.is_expired()
                    && matches!(
                        guarded(
                            &name,
                            "prepare release",
                            run.deadline.call_limit(None),
                            panel.prepare_release(true)
                        )
                        .await,
                        Ok(true)
                    );
                let committed = prepared
                    && !run.deadline.is_expired()
                    && guarded(&name, "commit", run.deadline.call_limit(None), panel.commit())
                        .await
                        .is_ok();
                if committed {
                    continue;
                }
                run.record(ShutdownError::vetoed(&name, "could not release cleanly"));
                if run.deadline.is_expired() {
                    // out of time: detach in the background, the process is going away
                    let panel = Arc::clone(panel);
                    tokio::spawn(async move { panel.force_detach().await });
                } else {
                    let limit = run.deadline.call_limit(None);
                    let _ = guarded(&name, "force detach", limit, panel.force_detach()).await;
                }
            }
            return Step::Continue;
        }

        let mut prepared: Vec<Arc<dyn PanelResourceManager>> = Vec::new();
        for panel in &panels {
            let name = format!("panel '{}'", panel.name());
            let limit = run.deadline.call_limit(None);
            let error = match guarded(&name, "prepare release", limit, panel.prepare_release(false))
                .await
            {
                Ok(true) => {
                    prepared.push(Arc::clone(panel));
                    continue;
                }
                Ok(false) => ShutdownError::vetoed(&name, "refused to release"),
                Err(failure) => failure.into_error(&name, "prepare release"),
            };
            self.rollback(&prepared).await;
            return run.fail(error);
        }

        if run.kind.is_evaluation_only() {
            self.rollback(&prepared).await;
            return Step::Continue;
        }
        for panel in &prepared {
            let name = format!("panel '{}'", panel.name());
            if guarded(&name, "commit", None, panel.commit()).await.is_err() {
                log::error!("{} failed to commit its release", name);
            }
        }
        Step::Continue
    }

    async fn save(&self, run: &mut Run) {
        if run.policy == Policy::BestEffort && run.deadline.is_expired() {
            run.record(ShutdownError::PersistenceFailure {
                stage: PersistStage::Save,
                reason: "no time left before the deadline".to_string(),
            });
            return;
        }
        let store = Arc::clone(&self.participants.config);
        match guarded("configuration", "save", run.deadline.call_limit(None), store.save()).await {
            Ok(true) => run.config_saved = true,
            Ok(false) => run.record(ShutdownError::PersistenceFailure {
                stage: PersistStage::Save,
                reason: "the store reported a failure".to_string(),
            }),
            Err(failure) => run.record(ShutdownError::PersistenceFailure {
                stage: PersistStage::Save,
                reason: failure.into_error("configuration", "save").to_string(),
            }),
        }
    }

    async fn persist(&self, run: &mut Run) -> Step {
        if !run.auto_save {
            log::info!("Auto-save is off; configuration not saved");
            return Step::Continue;
        }
        self.block_reason(run, Some(BlockReason::SavingConfiguration));

        if run.policy == Policy::BestEffort {
            let store = Arc::clone(&self.participants.config);
            let backup = if run.deadline.is_expired() {
                Err(CallFailure::TimedOut(Duration::ZERO))
            } else {
                guarded(
                    "configuration",
                    "backup",
                    run.deadline.call_limit(None),
                    store.backup_current(),
                )
                .await
            };
            match backup {
                Ok(true) => {
                    run.backup_verified = Some(true);
                    self.save(run).await;
                }
                Ok(false) => {
                    run.backup_verified = Some(false);
                    run.record(ShutdownError::PersistenceFailure {
                        stage: PersistStage::Backup,
                        reason: "backup could not be verified; save skipped".to_string(),
                    });
                }
                Err(failure) => {
                    run.backup_verified = Some(false);
                    run.record(ShutdownError::PersistenceFailure {
                        stage: PersistStage::Backup,
                        reason: failure.into_error("configuration", "backup").to_string(),
                    });
                }
            }
        } else {
            self.save(run).await;
        }

        self.block_reason(run, None);
        Step::Continue
    }

    async fn after_rejection(&mut self, run: &Run) {
        self.block_reason(run, None);
        if run.kind == ShutdownKind::SessionEnd && !self.forced_notice_shown {
            self.forced_notice_shown = true;
            let _ = guarded(
                "host",
                "forced shutdown notice",
                run.deadline.call_limit(Some(NOTICE_LIMIT)),
                self.host.notify_forced_shutdown(),
            )
            .await;
        }
    }

    fn terminate(&mut self) {
        if self.root_destroyed {
            return;
        }
        self.root_destroyed = true;
        let host = Arc::clone(&self.host);
        if guarded_sync("host", "destroy root window", || host.destroy_root_window()).is_err() {
            log::error!("Destroying the root window failed; exiting anyway");
        }
        log::info!("Terminated");
    }
}
