//! Application settings
//!
//! The settings file is part of the persisted tree guarded by the
//! backup-then-commit scheme in [`crate::config::store`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::error::{ConfigError, ConfigResult};

pub const SETTINGS_FILE: &str = "settings.toml";
const APP_DIR_NAME: &str = "Endsession";

/// Settings shared between the coordinator (reads) and the store (saves)
pub type SharedSettings = Arc<RwLock<AppSettings>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Ask "close the application?" on a user close
    pub confirm_on_close: bool,
    /// Save the configuration while shutting down
    pub auto_save: bool,
    pub shutdown: ShutdownSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            confirm_on_close: false,
            auto_save: true,
            shutdown: ShutdownSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownSettings {
    /// Budget assumed for a critical session end when the OS gives none
    pub critical_budget_ms: u64,
    /// Kept in reserve before the OS kill
    pub safety_margin_ms: u64,
    pub disk_poll_interval_ms: u64,
    /// Subtracted from the remaining budget when waiting for canceled jobs
    pub disk_wait_margin_ms: u64,
    /// Longest wait for canceled jobs to unwind outside a critical shutdown
    pub disk_cancel_cap_ms: u64,
    pub session_poll_interval_ms: u64,
    pub session_vote_timeout_ms: u64,
    pub session_close_grace_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            critical_budget_ms: 5000,
            safety_margin_ms: 500,
            disk_poll_interval_ms: 200,
            disk_wait_margin_ms: 200,
            disk_cancel_cap_ms: 10_000,
            session_poll_interval_ms: 50,
            session_vote_timeout_ms: 30_000,
            session_close_grace_ms: 300,
        }
    }
}

impl ShutdownSettings {
    pub fn critical_budget(&self) -> Duration {
        Duration::from_millis(self.critical_budget_ms)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }

    pub fn disk_poll_interval(&self) -> Duration {
        Duration::from_millis(self.disk_poll_interval_ms)
    }

    pub fn disk_wait_margin(&self) -> Duration {
        Duration::from_millis(self.disk_wait_margin_ms)
    }

    pub fn disk_cancel_cap(&self) -> Duration {
        Duration::from_millis(self.disk_cancel_cap_ms)
    }

    pub fn session_poll_interval(&self) -> Duration {
        Duration::from_millis(self.session_poll_interval_ms)
    }

    pub fn session_vote_timeout(&self) -> Duration {
        Duration::from_millis(self.session_vote_timeout_ms)
    }

    pub fn session_close_grace(&self) -> Duration {
        Duration::from_millis(self.session_close_grace_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("shutdown.critical_budget_ms", self.critical_budget_ms),
            ("shutdown.disk_poll_interval_ms", self.disk_poll_interval_ms),
            ("shutdown.session_poll_interval_ms", self.session_poll_interval_ms),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidSetting {
                    key: key.to_string(),
                    message: format!("{} must be greater than zero", key),
                });
            }
        }
        if self.safety_margin_ms >= self.critical_budget_ms {
            return Err(ConfigError::InvalidSetting {
                key: "shutdown.safety_margin_ms".to_string(),
                message: "shutdown.safety_margin_ms must be smaller than critical_budget_ms"
                    .to_string(),
            });
        }
        Ok(())
    }
}

impl AppSettings {
    pub fn from_toml_str(contents: &str, origin: &Path) -> ConfigResult<Self> {
        let settings: AppSettings = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        settings.shutdown.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
            message: e.to_string(),
        })
    }

    /// Load `settings.toml` from `root`, defaulting when the file is absent
    pub async fn load(root: &Path) -> ConfigResult<Self> {
        let path = root.join(SETTINGS_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml_str(&contents, &path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::io("read", path, e)),
        }
    }

    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }
}

/// Default store root: `<platform config dir>/Endsession`
pub fn default_config_root() -> ConfigResult<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or(ConfigError::NoConfigDir)
}
