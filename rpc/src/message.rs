//! RPC message wire format.
//!
//! A message is a single datagram: one command byte followed by a
//! NUL-padded 260-byte service name. Directory handles travel beside it as
//! `SCM_RIGHTS` ancillary data.

use crate::error::{Error, Result};
use std::borrow::Cow;

/// Size of the name field.
pub const NAME_LEN: usize = 260;

/// Size of an encoded message.
pub const MESSAGE_LEN: usize = 1 + NAME_LEN;

/// Most descriptors any command carries.
pub const MAX_DESCRIPTORS: usize = 2;

/// Commands understood by the service manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Do nothing
    Noop = 0,
    /// Connect one service's output to another's input
    Plumb = 1,
    /// Register a service
    Load = 2,
    /// Start the service when input arrives on its pipe
    MakeInputActivated = 3,
    /// Forget a service
    Unload = 4,
    /// Give the service an input pipe others can be plumbed into
    MakePipeConnectable = 5,
    /// Start the service whenever its input pipe empties
    MakeRunOnEmpty = 6,
}

impl Command {
    /// Decode a command byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Command::Noop),
            1 => Ok(Command::Plumb),
            2 => Ok(Command::Load),
            3 => Ok(Command::MakeInputActivated),
            4 => Ok(Command::Unload),
            5 => Ok(Command::MakePipeConnectable),
            6 => Ok(Command::MakeRunOnEmpty),
            other => Err(Error::UnknownCommand(other)),
        }
    }

    /// Number of directory descriptors sent with this command.
    pub fn descriptors(self) -> usize {
        match self {
            Command::Noop => 0,
            Command::Plumb | Command::Load => 2,
            Command::MakeInputActivated
            | Command::Unload
            | Command::MakePipeConnectable
            | Command::MakeRunOnEmpty => 1,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Noop => write!(f, "NOOP"),
            Command::Plumb => write!(f, "PLUMB"),
            Command::Load => write!(f, "LOAD"),
            Command::MakeInputActivated => write!(f, "MAKE_INPUT_ACTIVATED"),
            Command::Unload => write!(f, "UNLOAD"),
            Command::MakePipeConnectable => write!(f, "MAKE_PIPE_CONNECTABLE"),
            Command::MakeRunOnEmpty => write!(f, "MAKE_RUN_ON_EMPTY"),
        }
    }
}

/// A command plus the service name it applies to.
#[derive(Clone, PartialEq, Eq)]
pub struct RpcMessage {
    /// The command
    pub command: Command,
    name: [u8; NAME_LEN],
}

impl RpcMessage {
    /// Create a message for a named service.
    ///
    /// The name must leave room for its terminating NUL.
    pub fn new(command: Command, name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() >= NAME_LEN {
            return Err(Error::NameTooLong {
                len: bytes.len(),
                max: NAME_LEN - 1,
            });
        }
        if bytes.contains(&0) {
            return Err(Error::NameContainsNul);
        }

        let mut field = [0u8; NAME_LEN];
        field[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            command,
            name: field,
        })
    }

    /// Create a message whose name field is empty.
    pub fn unnamed(command: Command) -> Self {
        Self {
            command,
            name: [0u8; NAME_LEN],
        }
    }

    /// Name bytes up to the first NUL.
    pub fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..end]
    }

    /// Name as text, replacing invalid UTF-8.
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name())
    }

    /// Encode the datagram payload.
    pub fn encode(&self) -> [u8; MESSAGE_LEN] {
        let mut out = [0u8; MESSAGE_LEN];
        out[0] = self.command as u8;
        out[1..].copy_from_slice(&self.name);
        out
    }

    /// Decode a datagram payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < MESSAGE_LEN {
            return Err(Error::ShortMessage(payload.len()));
        }
        let command = Command::from_byte(payload[0])?;
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&payload[1..MESSAGE_LEN]);
        Ok(Self { command, name })
    }
}

impl std::fmt::Debug for RpcMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcMessage")
            .field("command", &self.command)
            .field("name", &self.name_lossy())
            .finish()
    }
}
