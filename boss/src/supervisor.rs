//! The supervisor-of-supervisors state machine.
//!
//! Keeps exactly the right subordinates alive: a service manager, a logger
//! draining the service manager's output, and at most one control-action
//! runner at a time. Pending intents are turned into runner invocations in
//! fixed priority order. A fast stop intent drains everything: the service
//! manager is asked to terminate, the logging pipe is closed once it is gone,
//! and the loop ends when the logger has read the last of its input.
//!
//! All process handling goes through a [`ProcessHost`] and all sleeping
//! through an [`EventSource`], so the whole machine runs the same way
//! against real processes or a scripted test double.

use crate::error::Result;
use crate::event::EventSource;
use crate::host::{ExitStatus, ProcessHost, Role};
use crate::intent::{Intent, PendingIntents};
use crate::power::ShutdownType;
use keeper_rpc::Scope;
use nix::unistd::Pid;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Command lines of the subordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Programs {
    /// Which instance this is
    pub scope: Scope,
    /// Command line of the service manager
    pub service_manager: Vec<String>,
    /// Command line of the logger
    pub logger: Vec<String>,
    /// Program run for control actions
    pub control_runner: String,
    /// Arguments forwarded to the init action
    pub init_args: Vec<String>,
}

impl Programs {
    /// Command line for the one-shot init action.
    pub fn init_argv(&self) -> Vec<String> {
        let mut argv = self.runner_argv("init");
        argv.extend(self.init_args.iter().cloned());
        argv
    }

    /// Command line for an intent, if it is one the runner handles.
    pub fn intent_argv(&self, intent: Intent) -> Option<Vec<String>> {
        let target = intent.target()?;
        let mut argv = self.runner_argv("start");
        argv.push(target.to_string());
        Some(argv)
    }

    fn runner_argv(&self, subcommand: &str) -> Vec<String> {
        let mut argv = vec![self.control_runner.clone()];
        if self.scope == Scope::User {
            argv.push("--user".to_string());
        }
        argv.push(subcommand.to_string());
        argv
    }
}

/// A managed child: `None` means not currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subordinate {
    /// What this child is for
    pub role: Role,
    /// Process ID while running
    pub pid: Option<Pid>,
}

impl Subordinate {
    fn new(role: Role) -> Self {
        Self { role, pid: None }
    }

    /// Whether the child is running.
    pub fn is_running(&self) -> bool {
        self.pid.is_some()
    }
}

/// Where the machine is in its lifecycle, derived from its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No stop requested
    Running,
    /// Stop requested, waiting for the service manager to exit
    Draining,
    /// Service manager gone, logger still reading its last output
    LoggerDraining,
    /// Everything has exited
    Terminating,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Running => write!(f, "running"),
            Phase::Draining => write!(f, "draining"),
            Phase::LoggerDraining => write!(f, "logger-draining"),
            Phase::Terminating => write!(f, "terminating"),
        }
    }
}

/// Result of one pass of the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Wait for the next event and iterate again
    Continue,
    /// Stop was requested and everything has exited
    Finished,
}

/// The supervisor state machine.
pub struct Supervisor<'a, H, E> {
    pending: &'a PendingIntents,
    host: H,
    events: E,
    programs: Programs,
    logger_restart_delay: Duration,
    manager: Subordinate,
    logger: Subordinate,
    runner: Subordinate,
    /// The current service manager has been asked to terminate
    terminate_sent: bool,
    phase: Phase,
}

impl<'a, H: ProcessHost, E: EventSource> Supervisor<'a, H, E> {
    /// Create a supervisor with nothing running.
    pub fn new(
        pending: &'a PendingIntents,
        host: H,
        events: E,
        programs: Programs,
        logger_restart_delay: Duration,
    ) -> Self {
        Self {
            pending,
            host,
            events,
            programs,
            logger_restart_delay,
            manager: Subordinate::new(Role::ServiceManager),
            logger: Subordinate::new(Role::Logger),
            runner: Subordinate::new(Role::ControlRunner),
            terminate_sent: false,
            phase: Phase::Running,
        }
    }

    /// Run until stop is requested and everything has exited.
    ///
    /// Returns what the fast stop intents asked for. Only a failure of the
    /// event source ends the loop early.
    pub fn run(&mut self) -> Result<ShutdownType> {
        info!(scope = %self.programs.scope, "Supervisor ready, entering event loop");

        loop {
            if self.iterate() == Step::Finished {
                break;
            }
            if let Err(e) = self.events.wait_for_event() {
                error!(error = %e, "Waiting for events failed");
                return Err(e);
            }
        }

        let shutdown_type = ShutdownType::from_pending(self.pending);
        info!(shutdown_type = %shutdown_type, "Supervisor finished");
        Ok(shutdown_type)
    }

    /// One pass over the pending state.
    pub fn iterate(&mut self) -> Step {
        if self.pending.take_child() {
            self.reap();
        }

        if self.pending.take(Intent::Unknown) {
            warn!("Ignoring unrecognised signal");
        }

        if !self.runner.is_running() {
            self.launch_runner();
        }

        let stop = self.pending.stop_requested();
        self.update_phase(stop);

        if stop && !self.manager.is_running() && !self.logger.is_running() {
            return Step::Finished;
        }

        // One SIGTERM per service manager process, not one per wakeup: every
        // SIGCHLD from a service it stops would otherwise repeat the request.
        // The flag clears when that process is reaped.
        if stop && !self.runner.is_running() && !self.terminate_sent {
            if let Some(pid) = self.manager.pid {
                match self.host.terminate(pid) {
                    Ok(()) => {
                        info!(pid = %pid, "Asked service manager to terminate");
                        self.terminate_sent = true;
                    }
                    Err(e) => warn!(pid = %pid, error = %e, "Failed to signal service manager"),
                }
            }
        }

        if !self.logger.is_running() && (!stop || self.manager.is_running()) {
            let argv = self.programs.logger.clone();
            self.logger.pid = self.spawn(Role::Logger, &argv);
        }

        if stop && !self.manager.is_running() && self.host.log_pipe_open() {
            self.host.close_log_pipe();
            info!("Closed logging pipe");
        }

        if !stop && !self.manager.is_running() {
            let argv = self.programs.service_manager.clone();
            self.manager.pid = self.spawn(Role::ServiceManager, &argv);
        }

        Step::Continue
    }

    /// Start a control-action runner for the init request or the highest
    /// priority pending intent.
    ///
    /// The request is put back if the runner cannot be started, so it is
    /// retried on the next wakeup.
    fn launch_runner(&mut self) {
        if self.pending.take_init() {
            let argv = self.programs.init_argv();
            self.runner.pid = self.spawn(Role::ControlRunner, &argv);
            if !self.runner.is_running() {
                self.pending.request_init();
            }
            return;
        }

        let Some(intent) = self.pending.take_next_action() else {
            return;
        };
        let Some(argv) = self.programs.intent_argv(intent) else {
            return;
        };
        info!(intent = %intent, "Acting on intent");
        self.runner.pid = self.spawn(Role::ControlRunner, &argv);
        if !self.runner.is_running() {
            self.pending.raise(intent);
        }
    }

    fn spawn(&mut self, role: Role, argv: &[String]) -> Option<Pid> {
        match self.host.spawn(role, argv) {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(role = %role, error = %e, "Failed to start, will retry");
                None
            }
        }
    }

    fn reap(&mut self) {
        for status in self.host.reap() {
            if self.manager.pid == Some(status.pid) {
                self.manager.pid = None;
                self.terminate_sent = false;
                log_exit(Role::ServiceManager, &status);
            } else if self.logger.pid == Some(status.pid) {
                self.logger.pid = None;
                log_exit(Role::Logger, &status);
                if !status.success() {
                    self.host.throttle(self.logger_restart_delay);
                }
            } else if self.runner.pid == Some(status.pid) {
                self.runner.pid = None;
                log_exit(Role::ControlRunner, &status);
            } else {
                debug!(pid = %status.pid, "Reaped orphan");
            }
        }
    }

    fn update_phase(&mut self, stop: bool) {
        let phase = match (stop, self.manager.is_running(), self.logger.is_running()) {
            (false, _, _) => Phase::Running,
            (true, true, _) => Phase::Draining,
            (true, false, true) => Phase::LoggerDraining,
            (true, false, false) => Phase::Terminating,
        };
        if phase != self.phase {
            info!(from = %self.phase, to = %phase, "Supervisor phase changed");
            self.phase = phase;
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The record for one of the subordinates.
    pub fn subordinate(&self, role: Role) -> &Subordinate {
        match role {
            Role::ServiceManager => &self.manager,
            Role::Logger => &self.logger,
            Role::ControlRunner => &self.runner,
        }
    }

    /// The process host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The process host, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

fn log_exit(role: Role, status: &ExitStatus) {
    if status.success() {
        info!(role = %role, pid = %status.pid, "Process exited");
    } else {
        warn!(
            role = %role,
            pid = %status.pid,
            code = ?status.code,
            signal = ?status.signal,
            "Process failed"
        );
    }
}
