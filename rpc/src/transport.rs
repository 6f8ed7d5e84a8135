//! Datagram transport with descriptor passing.
//!
//! Messages are fire-and-forget: there is no reply. The only retrying done
//! here covers a full kernel socket buffer (`ENOBUFS`).

use crate::error::{Error, Result};
use crate::message::{Command, RpcMessage, MAX_DESCRIPTORS, MESSAGE_LEN};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry budget for a full socket buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    /// Total send attempts, including the first
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Retry {
    /// Run one send, repeating it while the socket buffer is full.
    ///
    /// `EINTR` restarts the attempt without spending the budget. Once the
    /// budget is gone, or on any other error, the error is returned.
    pub fn send(
        &self,
        command: Command,
        mut attempt_send: impl FnMut() -> nix::Result<usize>,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            match attempt_send() {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(Errno::ENOBUFS) if attempt < self.attempts => {
                    debug!(command = %command, attempt, "Socket buffer full, retrying");
                    std::thread::sleep(self.delay);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(command = %command, error = %e, "Failed to send control message");
                    return Err(Error::Send { command, source: e });
                }
            }
        }
    }
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// A message taken off the socket, with the descriptors that came with it.
#[derive(Debug)]
pub struct Received {
    /// The decoded message
    pub message: RpcMessage,
    /// Passed descriptors, in the order they were sent
    pub fds: Vec<OwnedFd>,
}

/// One end of the control socket.
pub struct Transport {
    socket: UnixDatagram,
    retry: Retry,
}

impl Transport {
    /// Connect an unbound datagram socket to the manager's control socket.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let socket = UnixDatagram::unbound()?;
        socket.connect(path).map_err(|source| Error::Connect {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Connected to control socket");
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already connected (or bound) socket.
    pub fn from_socket(socket: UnixDatagram) -> Self {
        Self {
            socket,
            retry: Retry::default(),
        }
    }

    /// Replace the retry budget.
    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying socket.
    pub fn socket(&self) -> &UnixDatagram {
        &self.socket
    }

    /// Send a message and its descriptors as one datagram.
    pub fn send(&self, message: &RpcMessage, fds: &[RawFd]) -> Result<()> {
        let payload = message.encode();
        let iov = [IoSlice::new(&payload)];
        let rights = [ControlMessage::ScmRights(fds)];
        let cmsgs: &[ControlMessage<'_>] = if fds.is_empty() { &[] } else { &rights };

        let sent = self.retry.send(message.command, || {
            sendmsg::<()>(self.socket.as_raw_fd(), &iov, cmsgs, MsgFlags::empty(), None)
        });
        if sent.is_ok() {
            debug!(
                command = %message.command,
                name = %message.name_lossy(),
                fds = fds.len(),
                "Sent control message"
            );
        }
        sent
    }

    /// Block for the next message.
    ///
    /// Descriptors arriving with a malformed message are closed.
    pub fn receive(&self) -> Result<Received> {
        let mut payload = [0u8; MESSAGE_LEN];
        let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_DESCRIPTORS]);

        let (len, fds) = loop {
            let mut iov = [IoSliceMut::new(&mut payload)];
            let msg = match recvmsg::<()>(
                self.socket.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buffer),
                MsgFlags::empty(),
            ) {
                Ok(msg) => msg,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            };

            let mut fds = Vec::new();
            for cmsg in msg.cmsgs() {
                if let ControlMessageOwned::ScmRights(received) = cmsg {
                    // SAFETY: the kernel just installed these descriptors for us
                    fds.extend(received.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
                }
            }
            if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
                warn!("Control data truncated, descriptors lost");
            }
            break (msg.bytes, fds);
        };

        for fd in &fds {
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        }

        let message = RpcMessage::decode(&payload[..len])?;
        let expected = message.command.descriptors();
        if fds.len() != expected {
            return Err(Error::DescriptorCount {
                command: message.command,
                expected,
                received: fds.len(),
            });
        }

        debug!(
            command = %message.command,
            name = %message.name_lossy(),
            "Received control message"
        );
        Ok(Received { message, fds })
    }
}

/// Create the manager's end of the control socket.
///
/// Creates the parent directory, replaces any stale socket file, and leaves
/// the socket accessible to its owner only.
pub fn bind_control_socket(path: impl AsRef<Path>) -> Result<UnixDatagram> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let socket = UnixDatagram::bind(path)?;

    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    }

    info!(path = %path.display(), "Control socket bound");
    Ok(socket)
}
