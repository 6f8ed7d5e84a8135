//! Error types for the system manager.

use thiserror::Error;

/// Result type alias for system manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the system manager.
#[derive(Error, Debug)]
pub enum Error {
    /// Process spawn error
    #[error("Failed to spawn process: {0}")]
    ProcessSpawnFailed(String),

    /// Signal handling could not be set up
    #[error("Signal error: {0}")]
    SignalError(String),

    /// Waiting for the next event failed
    #[error("Failed to wait for events: {0}")]
    EventWait(nix::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation not available on this platform
    #[error("Not supported on this platform: {0}")]
    Unsupported(&'static str),

    /// Control socket error
    #[error("Control socket error: {0}")]
    Rpc(#[from] keeper_rpc::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Nix error
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),
}
