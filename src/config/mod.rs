//! Settings and the transactional configuration store

pub mod error;
pub mod marker;
pub mod recovery;
pub mod settings;
pub mod store;
pub mod tree;

pub use error::{ConfigError, ConfigResult};
pub use marker::{BackupMarker, BackupState};
pub use recovery::{restore_from_backup_if_needed, RecoveryOutcome};
pub use settings::{default_config_root, AppSettings, SharedSettings, ShutdownSettings};
pub use store::{ConfigurationBackup, ConfigurationStore, FileConfigStore};
pub use tree::StoreLayout;
