//! Process plumbing for the subordinates.
//!
//! The supervisor state machine only talks to a [`ProcessHost`]; [`OsHost`]
//! is the real one, forking and reaping actual processes.

use crate::error::{Error, Result};
use crate::signals::MAX_SIGNAL;
use keeper_rpc::Scope;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, error, info};

/// Descriptor the service manager finds its control socket at.
pub const LISTEN_FD: RawFd = 3;

/// The three subordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The long-running service manager
    ServiceManager,
    /// The logger draining the logging pipe
    Logger,
    /// A short-lived control-action runner
    ControlRunner,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::ServiceManager => write!(f, "service-manager"),
            Role::Logger => write!(f, "logger"),
            Role::ControlRunner => write!(f, "control-runner"),
        }
    }
}

/// Exit status of a reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Process ID
    pub pid: Pid,
    /// Exit code (if exited normally)
    pub code: Option<i32>,
    /// Signal (if killed by signal)
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// A normal exit with the given code.
    pub fn exited(pid: Pid, code: i32) -> Self {
        Self {
            pid,
            code: Some(code),
            signal: None,
        }
    }

    /// Death by the given signal.
    pub fn signalled(pid: Pid, signal: i32) -> Self {
        Self {
            pid,
            code: None,
            signal: Some(signal),
        }
    }

    /// Check if the process exited successfully.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Everything the supervisor needs from the operating system.
pub trait ProcessHost {
    /// Start a subordinate with its role's standard wiring.
    fn spawn(&mut self, role: Role, argv: &[String]) -> Result<Pid>;

    /// Collect every child that has terminated, without blocking.
    fn reap(&mut self) -> Vec<ExitStatus>;

    /// Ask a process to terminate.
    fn terminate(&mut self, pid: Pid) -> Result<()>;

    /// Whether the write end of the logging pipe is still held.
    fn log_pipe_open(&self) -> bool;

    /// Close the write end of the logging pipe so the logger sees end-of-file.
    fn close_log_pipe(&mut self);

    /// Pause before restarting a subordinate that failed.
    fn throttle(&mut self, delay: Duration);
}

/// The real process host.
#[derive(Debug)]
pub struct OsHost {
    scope: Scope,
    console: PathBuf,
    control_socket: OwnedFd,
    log_read: OwnedFd,
    log_write: Option<OwnedFd>,
}

impl OsHost {
    /// Create the logging pipe and take ownership of the control socket.
    pub fn new(scope: Scope, console: PathBuf, control_socket: OwnedFd) -> Result<Self> {
        let (log_read, log_write) = create_pipe()?;
        Ok(Self {
            scope,
            console,
            control_socket,
            log_read,
            log_write: Some(log_write),
        })
    }

    fn output_to_log(&self, cmd: &mut Command) -> Result<()> {
        if let Some(ref log_write) = self.log_write {
            cmd.stdout(Stdio::from(log_write.try_clone()?));
            cmd.stderr(Stdio::from(log_write.try_clone()?));
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        }
        Ok(())
    }

    fn output_to_console(&self, cmd: &mut Command) -> Result<()> {
        match self.scope {
            Scope::System => {
                let console = OpenOptions::new()
                    .write(true)
                    .custom_flags(libc::O_NOCTTY)
                    .open(&self.console)?;
                cmd.stdout(Stdio::from(console.try_clone()?));
                cmd.stderr(Stdio::from(console));
            }
            Scope::User => {
                cmd.stdout(Stdio::inherit());
                cmd.stderr(Stdio::inherit());
            }
        }
        Ok(())
    }
}

impl ProcessHost for OsHost {
    fn spawn(&mut self, role: Role, argv: &[String]) -> Result<Pid> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::ProcessSpawnFailed(format!("Empty command line for {}", role)))?;

        let mut cmd = Command::new(program);
        cmd.args(args);

        match role {
            Role::ServiceManager => {
                cmd.stdin(Stdio::null());
                self.output_to_log(&mut cmd)?;
                cmd.env("LISTEN_FDS", "1");
                let socket = self.control_socket.as_raw_fd();
                // SAFETY: only async-signal-safe calls between fork and exec
                unsafe {
                    cmd.pre_exec(move || pass_listen_fd(socket));
                }
            }
            Role::Logger => {
                cmd.stdin(Stdio::from(self.log_read.try_clone()?));
                self.output_to_console(&mut cmd)?;
            }
            Role::ControlRunner => {
                cmd.stdin(Stdio::null());
                self.output_to_log(&mut cmd)?;
            }
        }

        // SAFETY: only async-signal-safe calls between fork and exec
        unsafe {
            cmd.pre_exec(reset_signals);
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::ProcessSpawnFailed(format!("{}: {}", program, e)))?;

        let pid = Pid::from_raw(child.id() as i32);
        info!(role = %role, pid = %pid, program = %program, "Spawned process");
        Ok(pid)
    }

    fn reap(&mut self) -> Vec<ExitStatus> {
        let mut statuses = Vec::new();

        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    debug!(pid = %pid, code = code, "Reaped process");
                    statuses.push(ExitStatus::exited(pid, code));
                }
                Ok(WaitStatus::Signaled(pid, sig, _)) => {
                    debug!(pid = %pid, signal = ?sig, "Reaped signaled process");
                    statuses.push(ExitStatus::signalled(pid, sig as i32));
                }
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => {
                    // No more zombies to reap
                    break;
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!(error = %e, "Error reaping zombies");
                    break;
                }
            }
        }

        statuses
    }

    fn terminate(&mut self, pid: Pid) -> Result<()> {
        kill(pid, Signal::SIGTERM)?;
        Ok(())
    }

    fn log_pipe_open(&self) -> bool {
        self.log_write.is_some()
    }

    fn close_log_pipe(&mut self) {
        self.log_write = None;
    }

    fn throttle(&mut self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Create a pipe with both ends close-on-exec.
fn create_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0; 2];
    // SAFETY: fds has room for the two descriptors pipe writes
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    // SAFETY: pipe just returned these descriptors and nothing else owns them
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

/// Child side: put the control socket at the well-known descriptor.
fn pass_listen_fd(socket: RawFd) -> io::Result<()> {
    if socket == LISTEN_FD {
        // dup2 onto itself leaves close-on-exec set
        // SAFETY: plain fcntl on a descriptor we own in this child
        let flags = unsafe { libc::fcntl(LISTEN_FD, libc::F_GETFD) };
        if flags < 0
            || unsafe { libc::fcntl(LISTEN_FD, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0
        {
            return Err(io::Error::last_os_error());
        }
        return Ok(());
    }
    // SAFETY: dup2 is async-signal-safe; the new descriptor has close-on-exec clear
    if unsafe { libc::dup2(socket, LISTEN_FD) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Child side: default dispositions and an empty signal mask.
fn reset_signals() -> io::Result<()> {
    for signo in 1..MAX_SIGNAL as libc::c_int {
        if signo == libc::SIGKILL || signo == libc::SIGSTOP {
            continue;
        }
        // Numbers the platform lacks fail with EINVAL, which is harmless here
        // SAFETY: SIG_DFL installs no code
        unsafe { libc::signal(signo, libc::SIG_DFL) };
    }

    let mut empty = std::mem::MaybeUninit::uninit();
    // SAFETY: sigemptyset initialises the set before it is used
    let rc = unsafe {
        libc::sigemptyset(empty.as_mut_ptr());
        libc::pthread_sigmask(libc::SIG_SETMASK, empty.as_ptr(), std::ptr::null_mut())
    };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Make sure descriptors 0, 1 and 2 are open, pointing any gap at `/dev/null`.
///
/// Run before anything else is opened so that the logging pipe and control
/// socket can never end up as standard input or output.
pub fn ensure_standard_descriptors() -> Result<()> {
    for fd in 0..3 {
        match fcntl(fd, FcntlArg::F_GETFD) {
            Ok(_) => continue,
            Err(Errno::EBADF) => {
                // Lower descriptors are already open, so this lands on fd
                let null =
                    nix::fcntl::open("/dev/null", OFlag::O_RDWR, nix::sys::stat::Mode::empty())?;
                debug!(fd = null, "Opened /dev/null for missing standard descriptor");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
