//! Typed client operations on the service manager.

use crate::error::Result;
use crate::message::{Command, RpcMessage};
use crate::paths::{control_socket_path, Scope};
use crate::transport::Transport;
use std::os::fd::{AsFd, AsRawFd};
use std::path::Path;

/// Client for the service manager's control socket.
///
/// The socket is connected once; a failed call does not reconnect.
pub struct RpcClient {
    transport: Transport,
}

impl RpcClient {
    /// Wrap a transport.
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Connect to the control socket at `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Transport::connect(path)?))
    }

    /// Connect to the well-known control socket of an instance.
    pub fn connect_scope(scope: Scope) -> Result<Self> {
        Self::connect(control_socket_path(scope))
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Register a service with the manager.
    ///
    /// `want_pipe` additionally gives it a connectable input pipe, and
    /// `run_on_empty` makes it start whenever that pipe drains.
    pub fn load(
        &self,
        name: &str,
        supervise_dir: impl AsFd,
        service_dir: impl AsFd,
        want_pipe: bool,
        run_on_empty: bool,
    ) -> Result<()> {
        let supervise_fd = supervise_dir.as_fd().as_raw_fd();
        let service_fd = service_dir.as_fd().as_raw_fd();

        let message = RpcMessage::new(Command::Load, name)?;
        self.transport.send(&message, &[supervise_fd, service_fd])?;

        if want_pipe {
            let message = RpcMessage::new(Command::MakePipeConnectable, name)?;
            self.transport.send(&message, &[supervise_fd])?;
        }

        if run_on_empty {
            let message = RpcMessage::new(Command::MakeRunOnEmpty, name)?;
            self.transport.send(&message, &[supervise_fd])?;
        }

        Ok(())
    }

    /// Ask the manager to forget a service.
    pub fn unload(&self, supervise_dir: impl AsFd) -> Result<()> {
        let message = RpcMessage::unnamed(Command::Unload);
        self.transport
            .send(&message, &[supervise_dir.as_fd().as_raw_fd()])
    }

    /// Connect the output of one service to the input of another, typically
    /// a service to its log service.
    pub fn plumb(&self, out_supervise_dir: impl AsFd, in_supervise_dir: impl AsFd) -> Result<()> {
        let message = RpcMessage::unnamed(Command::Plumb);
        self.transport.send(
            &message,
            &[
                out_supervise_dir.as_fd().as_raw_fd(),
                in_supervise_dir.as_fd().as_raw_fd(),
            ],
        )
    }

    /// Make a service start when input arrives on its pipe.
    pub fn make_input_activated(&self, supervise_dir: impl AsFd) -> Result<()> {
        let message = RpcMessage::unnamed(Command::MakeInputActivated);
        self.transport
            .send(&message, &[supervise_dir.as_fd().as_raw_fd()])
    }
}
