//! Error types for the control-plane RPC.

use crate::message::Command;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for RPC and supervise directory operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to a service manager or a supervise directory.
#[derive(Error, Debug)]
pub enum Error {
    /// Service name does not fit the fixed-size name field
    #[error("Service name too long: {len} bytes (at most {max})")]
    NameTooLong { len: usize, max: usize },

    /// Service name has an embedded NUL
    #[error("Service name contains a NUL byte")]
    NameContainsNul,

    /// Command byte outside the known range
    #[error("Unknown RPC command: {0}")]
    UnknownCommand(u8),

    /// Datagram shorter than a message
    #[error("Short RPC message: {0} bytes")]
    ShortMessage(usize),

    /// Wrong number of passed descriptors for the command
    #[error("{command} expects {expected} descriptors, received {received}")]
    DescriptorCount {
        command: Command,
        expected: usize,
        received: usize,
    },

    /// Could not connect to the control socket
    #[error("Failed to connect to {}: {source}", .path.display())]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Sending a message failed
    #[error("Failed to send {command} message: {source}")]
    Send { command: Command, source: nix::Error },

    /// Service directory has no supervise subdirectory
    #[error("No supervise directory in {}", .0.display())]
    MissingSuperviseDir(PathBuf),

    /// Nothing holds the supervise pipes open
    #[error("No supervisor is running in {}", .0.display())]
    NotRunning(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Whether retrying later cannot help: the answer is a logical "no" or the
    /// request itself is malformed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::NameTooLong { .. }
                | Error::NameContainsNul
                | Error::UnknownCommand(_)
                | Error::MissingSuperviseDir(_)
                | Error::NotRunning(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors() {
        assert!(Error::MissingSuperviseDir(PathBuf::from("/srv/x")).is_permanent());
        assert!(Error::NotRunning(PathBuf::from("/srv/x/supervise")).is_permanent());
        assert!(!Error::Io(std::io::Error::from_raw_os_error(libc::EACCES)).is_permanent());
        assert!(!Error::Send {
            command: Command::Load,
            source: nix::Error::ENOBUFS,
        }
        .is_permanent());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::NameTooLong { len: 300, max: 259 };
        assert_eq!(err.to_string(), "Service name too long: 300 bytes (at most 259)");

        let err = Error::MissingSuperviseDir(PathBuf::from("/srv/web"));
        assert_eq!(err.to_string(), "No supervise directory in /srv/web");
    }
}
