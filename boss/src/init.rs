//! Init system core - PID 1 and per-user session duties.

use crate::config::BossConfig;
use crate::error::Result;
use crate::event;
use crate::host::{ensure_standard_descriptors, OsHost};
use crate::intent::{Intent, PendingIntents};
use crate::power::{self, in_container};
use crate::supervisor::{Programs, Supervisor};
use keeper_rpc::{bind_control_socket, Scope};
use std::os::fd::OwnedFd;
use tracing::info;

/// Intents recorded by the signal handlers of this process.
static PENDING: PendingIntents = PendingIntents::new();

/// The system manager process.
pub struct Init {
    /// Configuration
    config: BossConfig,
    /// Which instance this is
    scope: Scope,
    /// Arguments forwarded to the init action
    init_args: Vec<String>,
}

impl Init {
    /// Create a new system manager.
    pub fn new(config: BossConfig, scope: Scope, init_args: Vec<String>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            scope,
            init_args,
        })
    }

    /// Whether this process is process #1.
    pub fn is_pid1() -> bool {
        std::process::id() == 1
    }

    /// Command lines handed to the supervisor.
    pub fn programs(&self) -> Programs {
        Programs {
            scope: self.scope,
            service_manager: self.config.service_manager.clone(),
            logger: self.config.logger.clone(),
            control_runner: self.config.control_runner.clone(),
            init_args: self.init_args.clone(),
        }
    }

    /// Run the system manager until it is told to stop, then stop the
    /// machine if this is process #1.
    pub fn run(self) -> Result<()> {
        let pid1 = self.scope == Scope::System && Self::is_pid1();
        info!(scope = %self.scope, pid = std::process::id(), "Keeper system manager starting");

        ensure_standard_descriptors()?;

        #[cfg(target_os = "linux")]
        if pid1 {
            // Ctrl-Alt-Del arrives as SIGINT instead of an immediate reboot
            if let Err(e) = nix::sys::reboot::set_cad_enabled(false) {
                tracing::warn!(error = %e, "Failed to disable Ctrl-Alt-Del");
            }
        }

        let events = event::install(&PENDING, self.scope)?;
        let socket = bind_control_socket(self.config.control_socket_path(self.scope))?;
        let host = OsHost::new(
            self.scope,
            self.config.console.clone(),
            OwnedFd::from(socket),
        )?;

        match self.scope {
            Scope::System => PENDING.request_init(),
            Scope::User => PENDING.raise(Intent::Normal),
        }

        let mut supervisor = Supervisor::new(
            &PENDING,
            host,
            events,
            self.programs(),
            self.config.logger_restart_delay(),
        );
        let shutdown_type = supervisor.run()?;

        if pid1 {
            if in_container() {
                info!(shutdown_type = %shutdown_type, "Running in a container, exiting instead");
            } else {
                power::shutdown(shutdown_type)?;
            }
        }

        Ok(())
    }
}
