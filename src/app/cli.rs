//! Command line interface

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::shutdown::types::{ShutdownKind, ShutdownTrigger};

#[derive(Parser, Debug, Clone)]
#[command(name = "endsession")]
#[command(about = "Coordinated shutdown host for a two-panel file manager")]
#[command(version)]
pub struct Args {
    /// Configuration directory (defaults to the platform config dir)
    #[arg(long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_name = "LEVEL", global = true, value_parser = ["trace", "debug", "info", "warn", "error", "off"])]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", global = true, value_parser = ["text", "ext", "json"])]
    pub log_format: Option<String>,

    /// Log file path
    #[arg(long = "log-file", value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Force colored output
    #[arg(long = "color", global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color", conflicts_with = "color", global = true)]
    pub no_color: bool,

    /// More output (repeatable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Less output (repeatable)
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count, global = true)]
    pub quiet: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Host the coordinator until a signal ends the process
    Run(Workload),
    /// Restore the configuration from a verified backup if the last save was cut short
    Recover,
    /// Fire one shutdown trigger against a freshly started host
    Simulate {
        /// user-close, forced-close, session-query, session-end or critical-session-end
        kind: ShutdownKind,

        /// Time budget granted by the OS, in milliseconds
        #[arg(long = "budget-ms", value_name = "MS")]
        budget_ms: Option<u64>,

        #[command(flatten)]
        workload: Workload,
    },
}

/// Work the host is doing when the shutdown request arrives
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct Workload {
    /// Open a running search session with this name (repeatable)
    #[arg(long = "search", value_name = "NAME")]
    pub searches: Vec<String>,

    /// Open a viewer on a temporary copy of this file (repeatable)
    #[arg(long = "view", value_name = "FILE")]
    pub views: Vec<PathBuf>,

    /// Start copying these files in the background
    #[arg(long = "copy", value_name = "FILE", requires = "copy_to")]
    pub copy: Vec<PathBuf>,

    /// Target directory for --copy
    #[arg(long = "to", value_name = "DIR")]
    pub copy_to: Option<PathBuf>,

    /// Pause between copied chunks, in milliseconds
    #[arg(long = "throttle-ms", value_name = "MS", default_value_t = 0)]
    pub throttle_ms: u64,
}

impl Args {
    /// Net verbosity: `-v` counts up, `-q` counts down
    pub fn verbosity(&self) -> i8 {
        (self.verbose.min(i8::MAX as u8) as i8).saturating_sub(self.quiet.min(i8::MAX as u8) as i8)
    }

    pub fn use_color(&self) -> bool {
        use std::io::IsTerminal;
        (self.color || std::io::stderr().is_terminal()) && !self.no_color
    }
}

/// The trigger a simulated request of `kind` stands for
pub fn trigger_for(kind: ShutdownKind, budget_ms: Option<u64>) -> ShutdownTrigger {
    match kind {
        ShutdownKind::UserClose => ShutdownTrigger::UserCloseRequested,
        ShutdownKind::ForcedClose => ShutdownTrigger::ForcedCloseRequested,
        ShutdownKind::SessionQuery => ShutdownTrigger::QueryEndSession {
            critical: false,
            remaining_budget_ms: budget_ms,
        },
        ShutdownKind::SessionEnd => ShutdownTrigger::EndSession {
            critical: false,
            budget_ms,
        },
        ShutdownKind::CriticalSessionEnd => ShutdownTrigger::EndSession {
            critical: true,
            budget_ms,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_no_subcommand() {
        let args = Args::try_parse_from(["endsession"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["endsession", "recover", "--config-dir", "/tmp/es", "-vv"]).unwrap();
        assert!(matches!(args.command, Some(Command::Recover)));
        assert_eq!(args.config_dir, Some(PathBuf::from("/tmp/es")));
        assert_eq!(args.verbosity(), 2);
    }

    #[test]
    fn test_simulate_parses_kind_and_workload() {
        let args = Args::try_parse_from([
            "endsession",
            "simulate",
            "critical-session-end",
            "--budget-ms",
            "3000",
            "--search",
            "*.rs",
            "--copy",
            "a.txt",
            "--to",
            "/tmp/out",
        ])
        .unwrap();
        let Some(Command::Simulate {
            kind,
            budget_ms,
            workload,
        }) = args.command
        else {
            panic!("expected simulate");
        };
        assert_eq!(kind, ShutdownKind::CriticalSessionEnd);
        assert_eq!(budget_ms, Some(3000));
        assert_eq!(workload.searches, vec!["*.rs".to_string()]);
        assert_eq!(workload.copy_to, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn test_copy_requires_target() {
        assert!(Args::try_parse_from(["endsession", "run", "--copy", "a.txt"]).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(Args::try_parse_from(["endsession", "simulate", "reboot"]).is_err());
    }

    #[test]
    fn test_trigger_for_round_trips_kind() {
        use strum::IntoEnumIterator;
        for kind in ShutdownKind::iter() {
            assert_eq!(trigger_for(kind, Some(1000)).kind(), Some(kind));
        }
    }
}
