//! Keeper system manager - the supervisor of supervisors.
//!
//! This crate is process #1 (or the per-user session equivalent). It keeps
//! three subordinates running and nothing else:
//!
//! - the **service manager**, which supervises the actual services and
//!   listens on the control socket handed to it at descriptor 3
//! - the **logger**, draining everything the service manager writes
//! - a **control-action runner**, started once per requested action
//!
//! It reacts only to signals. Each one is recorded as a pending intent and
//! the main loop acts on them in a fixed priority order.
//!
//! # Architecture
//!
//! - **Init**: process set-up and the final halt, power off or reboot
//! - **Supervisor**: the state machine, driven through two traits
//! - **EventSource**: sleeping until a signal arrives (`sigsuspend` or kqueue)
//! - **ProcessHost**: forking, wiring and reaping the subordinates
//!
//! # Example
//!
//! ```no_run
//! use keeper_boss::{BossConfig, Init};
//! use keeper_rpc::Scope;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = BossConfig::for_scope(Scope::User);
//!     let init = Init::new(config, Scope::User, Vec::new())?;
//!     init.run()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod init;
pub mod intent;
pub mod power;
pub mod signals;
pub mod supervisor;

// Re-export main types
pub use config::BossConfig;
pub use error::{Error, Result};
pub use event::{EventSource, PlatformEventSource, SignalMaskSource};
pub use host::{ExitStatus, OsHost, ProcessHost, Role};
pub use init::Init;
pub use intent::{Intent, PendingIntents, Wake};
pub use power::ShutdownType;
pub use supervisor::{Phase, Programs, Step, Subordinate, Supervisor};
