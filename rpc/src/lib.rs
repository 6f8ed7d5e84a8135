//! Keeper control plane.
//!
//! Short-lived command-line tools use this crate to instruct the long-running
//! service manager. Two channels exist:
//!
//! - **RPC**: a fixed-size command datagram on the manager's `AF_UNIX`
//!   datagram socket, with directory handles passed beside it
//!   ([`transport`], [`client`], [`message`]).
//! - **Supervise pipes**: single control characters written straight into a
//!   service's `supervise/control` pipe, plus the `ok` liveness probe and the
//!   `status` file ([`supervise`]).
//!
//! # Example
//!
//! ```no_run
//! use keeper_rpc::{RpcClient, Scope, SuperviseDir};
//! use std::fs::File;
//!
//! fn main() -> keeper_rpc::Result<()> {
//!     let service = File::open("/var/sv/sshd")?;
//!     let supervise = SuperviseDir::for_service("/var/sv/sshd")?;
//!
//!     let client = RpcClient::connect_scope(Scope::System)?;
//!     client.load("sshd", &supervise, &service, false, false)?;
//!
//!     supervise.start()?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod message;
pub mod paths;
pub mod supervise;
pub mod transport;

// Re-export main types
pub use client::RpcClient;
pub use error::{Error, Result};
pub use message::{Command, RpcMessage, MAX_DESCRIPTORS, MESSAGE_LEN, NAME_LEN};
pub use paths::{control_socket_path, runtime_dir, Scope, SYSTEM_CONTROL_SOCKET};
pub use supervise::SuperviseDir;
pub use transport::{bind_control_socket, Received, Retry, Transport};
