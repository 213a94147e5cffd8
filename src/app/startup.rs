//! Process startup and application assembly

use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use super::cli::{trigger_for, Args, Command, Workload};
use super::console_host::ConsoleHost;
use super::event_loop::EventLoop;
use crate::config::{
    default_config_root, restore_from_backup_if_needed, AppSettings, ConfigResult,
    FileConfigStore, RecoveryOutcome, SharedSettings,
};
use crate::core::error_handling::log_error_with_context;
use crate::core::logging::{init_logging, level_from_verbosity};
use crate::core::version::{banner, extension_api_version};
use crate::diskops::{DiskJobError, DiskJobResult, DiskJobSupervisor, JobSpec};
use crate::panel::{FilePanel, PanelBinding, PanelResourceManager};
use crate::plugin::PluginHost;
use crate::session::{SearchDelegate, SessionHandle, SessionKind, SessionRegistry, ViewerDelegate};
use crate::shutdown::{
    setup_signal_handlers, GuardState, Participants, ShutdownCoordinator, ShutdownOutcome,
    ShutdownReport,
};

/// Everything the coordinator tears down, wired together
pub struct Application {
    pub root: PathBuf,
    pub host: Arc<ConsoleHost>,
    pub guards: Arc<GuardState>,
    pub settings: SharedSettings,
    pub store: Arc<FileConfigStore>,
    pub plugins: Arc<PluginHost>,
    pub disk_jobs: Arc<DiskJobSupervisor>,
    pub sessions: Arc<SessionRegistry>,
    pub panels: Vec<Arc<FilePanel>>,
    scratch: PathBuf,
}

impl Application {
    /// Recover the configuration tree, load settings and extensions, open the panels
    pub async fn start(root: PathBuf, host: Arc<ConsoleHost>) -> ConfigResult<Self> {
        match restore_from_backup_if_needed(&root).await {
            Ok(RecoveryOutcome::Clean) => {}
            Ok(outcome) => log::info!("Configuration recovery: {:?}", outcome),
            Err(e) => log::warn!("Configuration recovery skipped: {}", e),
        }

        let settings = AppSettings::load(&root).await?.shared();
        let store = Arc::new(FileConfigStore::new(&root, settings.clone()));
        let guards = Arc::new(GuardState::new());

        let plugins = Arc::new(
            PluginHost::new(extension_api_version(), guards.clone())
                .with_prompt(host.clone())
                .with_settings_sink(store.clone()),
        );
        let sections = store.read_extension_sections().await;
        let loaded = plugins.load_builtin(&sections).await;
        log::debug!("Loaded {} builtin extensions", loaded);

        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let home = dirs::home_dir().unwrap_or_else(|| cwd.clone());
        let panels = vec![
            Arc::new(FilePanel::new("left", PanelBinding::Disk { path: cwd })),
            Arc::new(FilePanel::new("right", PanelBinding::Disk { path: home })),
        ];

        let scratch = std::env::temp_dir().join(format!("endsession-{}", std::process::id()));

        // the main window exists from here on
        guards.set_can_close(true);
        Ok(Self {
            root,
            host,
            guards,
            settings,
            store,
            plugins,
            disk_jobs: Arc::new(DiskJobSupervisor::new()),
            sessions: Arc::new(SessionRegistry::new()),
            panels,
            scratch,
        })
    }

    /// Open the sessions and start the jobs described on the command line
    pub async fn open_workload(&self, workload: &Workload) -> DiskJobResult<()> {
        for name in &workload.searches {
            let delegate = SearchDelegate::new(
                Arc::new(AtomicBool::new(true)),
                Box::new(|| {
                    log::info!("Stopping running search");
                    true
                }),
            );
            self.sessions.register(SessionHandle::spawn(
                name.clone(),
                SessionKind::Search,
                Box::new(delegate),
            ));
        }

        for file in &workload.views {
            let temp_copy = self.temp_copy_of(file).await?;
            let delegate = ViewerDelegate::new(Some(temp_copy), Arc::new(AtomicBool::new(false)));
            self.sessions.register(SessionHandle::spawn(
                file.display().to_string(),
                SessionKind::Viewer,
                Box::new(delegate),
            ));
        }

        if let Some(target) = &workload.copy_to {
            if !workload.copy.is_empty() {
                let spec = JobSpec::copy(workload.copy.clone(), target)
                    .with_throttle(Duration::from_millis(workload.throttle_ms));
                self.disk_jobs.start(spec);
            }
        }
        Ok(())
    }

    async fn temp_copy_of(&self, file: &Path) -> DiskJobResult<PathBuf> {
        let name = file
            .file_name()
            .ok_or_else(|| DiskJobError::MissingSource {
                path: file.to_path_buf(),
            })?;
        tokio::fs::create_dir_all(&self.scratch)
            .await
            .map_err(|e| DiskJobError::io("create", &self.scratch, e))?;
        let copy = self.scratch.join(name);
        tokio::fs::copy(file, &copy)
            .await
            .map_err(|e| DiskJobError::io("copy", file, e))?;
        Ok(copy)
    }

    pub fn coordinator(&self) -> ShutdownCoordinator {
        let participants = Participants {
            disk_ops: self.disk_jobs.clone(),
            sessions: self.sessions.clone(),
            plugins: self.plugins.clone(),
            panels: self
                .panels
                .iter()
                .map(|panel| panel.clone() as Arc<dyn PanelResourceManager>)
                .collect(),
            config: self.store.clone(),
        };
        ShutdownCoordinator::new(
            participants,
            self.host.clone(),
            self.guards.clone(),
            self.settings.clone(),
        )
    }

    /// Remove the scratch directory once the viewers have deleted their copies
    pub async fn finish(&self) {
        if tokio::fs::remove_dir(&self.scratch).await.is_ok() {
            log::debug!("Removed {}", self.scratch.display());
        }
    }
}

/// Initialize and run the application; returns the process exit code
pub fn startup() -> i32 {
    let args = Args::parse();
    let use_color = args.use_color();
    colored::control::set_override(use_color);

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| level_from_verbosity(args.verbosity()).to_string());
    let log_file = args
        .log_file
        .as_ref()
        .map(|path| path.to_string_lossy().to_string());
    if let Err(e) = init_logging(
        Some(&level),
        args.log_format.as_deref(),
        log_file.as_deref(),
        use_color,
    ) {
        eprintln!("Failed to initialise logging: {}", e);
    }
    log::debug!("{}", banner());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("FATAL: could not start the async runtime: {}", e);
            return 1;
        }
    };
    runtime.block_on(dispatch(args, use_color))
}

async fn dispatch(args: Args, use_color: bool) -> i32 {
    let root = match args.config_dir.clone() {
        Some(dir) => dir,
        None => match default_config_root() {
            Ok(dir) => dir,
            Err(e) => {
                log_error_with_context(&e, "Locating the configuration directory");
                return 1;
            }
        },
    };
    log::debug!("Configuration root: {}", root.display());

    match args.command.unwrap_or(Command::Run(Workload::default())) {
        Command::Recover => recover(&root).await,
        Command::Run(workload) => run(root, &workload, use_color).await,
        Command::Simulate {
            kind,
            budget_ms,
            workload,
        } => {
            let host = Arc::new(ConsoleHost::new(use_color));
            let app = match prepare(root, host, &workload).await {
                Some(app) => app,
                None => return 1,
            };
            let mut coordinator = app.coordinator();
            let report = coordinator.dispatch(trigger_for(kind, budget_ms)).await;
            print_report(&report);
            app.finish().await;
            if report.outcome.allows_close() {
                0
            } else {
                1
            }
        }
    }
}

async fn prepare(root: PathBuf, host: Arc<ConsoleHost>, workload: &Workload) -> Option<Application> {
    let app = match Application::start(root, host).await {
        Ok(app) => app,
        Err(e) => {
            log_error_with_context(&e, "Loading the configuration");
            return None;
        }
    };
    if let Err(e) = app.open_workload(workload).await {
        log_error_with_context(&e, "Opening the workload");
        return None;
    }
    Some(app)
}

async fn run(root: PathBuf, workload: &Workload, use_color: bool) -> i32 {
    let host = Arc::new(ConsoleHost::new(use_color));
    let Some(app) = prepare(root, host, workload).await else {
        return 1;
    };

    let (triggers_tx, triggers_rx) = tokio::sync::mpsc::unbounded_channel();
    setup_signal_handlers(triggers_tx);
    log::info!(
        "Running; {} sessions, {} extensions. Ctrl-C to close, SIGTERM to end the session",
        app.sessions.open_count(),
        app.plugins.loaded_names().await.len()
    );

    let report = EventLoop::new(app.coordinator(), triggers_rx).run().await;
    app.finish().await;
    match report {
        Some(report) if report.outcome.is_terminated() => 0,
        _ => 1,
    }
}

async fn recover(root: &Path) -> i32 {
    match restore_from_backup_if_needed(root).await {
        Ok(RecoveryOutcome::Unrecoverable) => {
            eprintln!(
                "{} {} was interrupted mid-save and no verified backup exists",
                "warning:".yellow().bold(),
                root.display()
            );
            1
        }
        Ok(RecoveryOutcome::Restored { corrupted_copy }) => {
            println!(
                "Restored {} from backup; the interrupted tree is kept at {}",
                root.display(),
                corrupted_copy.display()
            );
            0
        }
        Ok(outcome) => {
            println!("{}: {:?}", root.display(), outcome);
            0
        }
        Err(e) => {
            log_error_with_context(&e, "Recovering the configuration");
            1
        }
    }
}

fn print_report(report: &ShutdownReport) {
    let outcome = match &report.outcome {
        ShutdownOutcome::Terminated => "terminated".green().bold(),
        ShutdownOutcome::Allowed => "allowed".green(),
        ShutdownOutcome::Rejected(_) => "rejected".red().bold(),
        ShutdownOutcome::Ignored => "ignored".normal(),
    };
    let kind = report
        .kind
        .map(|kind| kind.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("{}: {} in {:?}", kind, outcome, report.elapsed);
    if let ShutdownOutcome::Rejected(reason) = &report.outcome {
        println!("  reason: {}", reason);
    }
    let path: Vec<String> = report.path.iter().map(|phase| phase.to_string()).collect();
    println!("  phases: {}", path.join(" -> "));
    for degradation in &report.degradations {
        println!("  {} {}", "degraded:".yellow(), degradation);
    }
    if let Some(verified) = report.backup_verified {
        println!("  backup verified: {}", verified);
    }
    println!("  configuration saved: {}", report.config_saved);
}
