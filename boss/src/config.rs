//! System manager configuration.
//!
//! Every field has a per-scope default, so a configuration file only needs
//! to name what it changes.

use crate::error::{Error, Result};
use keeper_rpc::{control_socket_path, runtime_dir, Scope};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log directory of the system instance.
pub const SYSTEM_LOG_DIR: &str = "/var/log/system-manager";

/// System manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BossConfig {
    /// Command line of the service manager
    pub service_manager: Vec<String>,
    /// Command line of the logger
    pub logger: Vec<String>,
    /// Program run for control actions
    pub control_runner: String,
    /// Console device the logger writes to
    pub console: PathBuf,
    /// Control socket path, if not the scope's well-known one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_socket: Option<PathBuf>,
    /// Pause before restarting a logger that failed
    pub logger_restart_delay_ms: u64,
}

/// On-disk form: everything optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    service_manager: Option<Vec<String>>,
    logger: Option<Vec<String>>,
    control_runner: Option<String>,
    console: Option<PathBuf>,
    control_socket: Option<PathBuf>,
    logger_restart_delay_ms: Option<u64>,
}

impl BossConfig {
    /// Defaults for an instance.
    pub fn for_scope(scope: Scope) -> Self {
        let log_dir = match scope {
            Scope::System => PathBuf::from(SYSTEM_LOG_DIR),
            Scope::User => runtime_dir().join("log"),
        };

        Self {
            service_manager: vec!["service-manager".to_string()],
            logger: vec!["cyclog".to_string(), log_dir.display().to_string()],
            control_runner: "system-control".to_string(),
            console: PathBuf::from("/dev/console"),
            control_socket: None,
            logger_restart_delay_ms: 500,
        }
    }

    /// Parse TOML text over the defaults for an instance.
    pub fn from_toml(content: &str, scope: Scope) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        let defaults = Self::for_scope(scope);

        let config = Self {
            service_manager: file.service_manager.unwrap_or(defaults.service_manager),
            logger: file.logger.unwrap_or(defaults.logger),
            control_runner: file.control_runner.unwrap_or(defaults.control_runner),
            console: file.console.unwrap_or(defaults.console),
            control_socket: file.control_socket.or(defaults.control_socket),
            logger_restart_delay_ms: file
                .logger_restart_delay_ms
                .unwrap_or(defaults.logger_restart_delay_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file over the defaults for an instance.
    pub fn from_file(path: &Path, scope: Scope) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content, scope)
    }

    /// Reject command lines that could never be run.
    pub fn validate(&self) -> Result<()> {
        if self.service_manager.is_empty() || self.service_manager[0].is_empty() {
            return Err(Error::ConfigError("service_manager command is empty".to_string()));
        }
        if self.logger.is_empty() || self.logger[0].is_empty() {
            return Err(Error::ConfigError("logger command is empty".to_string()));
        }
        if self.control_runner.is_empty() {
            return Err(Error::ConfigError("control_runner is empty".to_string()));
        }
        Ok(())
    }

    /// Where the control socket is bound.
    pub fn control_socket_path(&self, scope: Scope) -> PathBuf {
        self.control_socket
            .clone()
            .unwrap_or_else(|| control_socket_path(scope))
    }

    /// The logger restart throttle.
    pub fn logger_restart_delay(&self) -> Duration {
        Duration::from_millis(self.logger_restart_delay_ms)
    }
}

impl Default for BossConfig {
    fn default() -> Self {
        Self::for_scope(Scope::System)
    }
}
