//! Direct control through a service's supervise directory.
//!
//! No RPC is involved: the service manager holds two named pipes open for
//! reading in each `supervise` directory. Writing one character to `control`
//! issues a command; being able to open `ok` for writing proves a supervisor
//! is alive. The binary `status` file sits beside them.

use crate::error::{Error, Result};
use keeper_status::{Status, StatusBlock, STATUS_BLOCK_LEN};
use nix::errno::Errno;
use nix::fcntl::{openat, OFlag};
use nix::sys::stat::Mode;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Name of the command pipe.
pub const CONTROL_PIPE: &str = "control";

/// Name of the liveness pipe.
pub const OK_PIPE: &str = "ok";

/// Name of the status file.
pub const STATUS_FILE: &str = "status";

/// Interval between liveness polls in [`SuperviseDir::wait_ok`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Command character: bring the service up.
pub const CONTROL_UP: u8 = b'u';

/// Command character: take the service down.
pub const CONTROL_DOWN: u8 = b'd';

/// An open supervise directory.
#[derive(Debug)]
pub struct SuperviseDir {
    dir: File,
    path: PathBuf,
}

impl SuperviseDir {
    /// Open a supervise directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = File::open(&path)?;
        if !dir.metadata()?.is_dir() {
            return Err(Error::Io(std::io::Error::from_raw_os_error(libc::ENOTDIR)));
        }
        Ok(Self { dir, path })
    }

    /// Open the `supervise` subdirectory of a service directory.
    pub fn for_service(service_dir: impl AsRef<Path>) -> Result<Self> {
        let service_dir = service_dir.as_ref();
        match Self::open(service_dir.join("supervise")) {
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(Error::MissingSuperviseDir(service_dir.to_path_buf()))
            }
            other => other,
        }
    }

    /// Path this directory was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bring the service up.
    pub fn start(&self) -> Result<()> {
        self.send_control(CONTROL_UP)
    }

    /// Take the service down.
    pub fn stop(&self) -> Result<()> {
        self.send_control(CONTROL_DOWN)
    }

    /// Write one command character to the `control` pipe.
    pub fn send_control(&self, command: u8) -> Result<()> {
        let mut pipe = match self.open_for_writing(CONTROL_PIPE, OFlag::O_NONBLOCK)? {
            Some(pipe) => pipe,
            None => return Err(Error::NotRunning(self.path.clone())),
        };
        pipe.write_all(&[command])?;
        debug!(
            path = %self.path.display(),
            command = %char::from(command),
            "Sent control character"
        );
        Ok(())
    }

    /// Whether a supervisor currently holds the `ok` pipe open.
    pub fn is_ok(&self) -> Result<bool> {
        Ok(self.open_for_writing(OK_PIPE, OFlag::O_NONBLOCK)?.is_some())
    }

    /// Wait for a supervisor to appear.
    ///
    /// With no timeout this blocks in `open` until one does. With a timeout
    /// the pipe is polled once a second, each attempt spending a second of
    /// the budget. Returns whether a supervisor was seen.
    pub fn wait_ok(&self, timeout: Option<Duration>) -> Result<bool> {
        let mut remaining = match timeout {
            Some(timeout) => timeout,
            None => {
                loop {
                    match self.open_for_writing(OK_PIPE, OFlag::empty()) {
                        Ok(Some(_)) => return Ok(true),
                        // The pipe may not have been created yet
                        Ok(None) => std::thread::sleep(POLL_INTERVAL),
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        loop {
            if self.is_ok()? {
                return Ok(true);
            }
            if remaining.is_zero() {
                return Ok(false);
            }
            std::thread::sleep(remaining.min(POLL_INTERVAL));
            remaining = remaining.saturating_sub(POLL_INTERVAL);
        }
    }

    /// Read and decode the `status` file.
    ///
    /// Whatever length was actually read is what gets decoded.
    pub fn read_status(&self) -> Result<Status> {
        let fd = openat(
            self.dir.as_raw_fd(),
            STATUS_FILE,
            OFlag::O_RDONLY | OFlag::O_NOCTTY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )?;
        // SAFETY: openat just returned this descriptor and nothing else owns it
        let mut file = unsafe { File::from_raw_fd(fd) };

        let mut buf = [0u8; STATUS_BLOCK_LEN];
        let mut len = 0;
        while len < buf.len() {
            match file.read(&mut buf[len..]) {
                Ok(0) => break,
                Ok(n) => len += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(StatusBlock::decode(&buf[..len]))
    }

    /// Open a pipe in this directory for writing.
    ///
    /// `None` means nobody has it open for reading, or it does not exist.
    fn open_for_writing(&self, name: &str, extra: OFlag) -> Result<Option<File>> {
        let flags = OFlag::O_WRONLY | OFlag::O_NOCTTY | OFlag::O_CLOEXEC | extra;
        loop {
            match openat(self.dir.as_raw_fd(), name, flags, Mode::empty()) {
                // SAFETY: openat just returned this descriptor and nothing else owns it
                Ok(fd) => return Ok(Some(unsafe { File::from_raw_fd(fd) })),
                Err(Errno::ENXIO) | Err(Errno::ENOENT) => return Ok(None),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl AsFd for SuperviseDir {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.dir.as_fd()
    }
}
