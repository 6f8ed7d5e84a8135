//! Keeper supervise status blocks.
//!
//! A service manager writes a small binary record into each service's
//! `supervise/status` file on every state change. Status tools and health
//! checks read it without talking to any live process.
//!
//! - [`block`]: the versioned status block codec
//! - [`tai64`]: TAI64/TAI64N labels used for every timestamp in the block
//!
//! # Example
//!
//! ```
//! use keeper_status::{Status, StatusBlock, Tai64N, Want};
//!
//! let mut block = StatusBlock::new(Tai64N::now());
//! block.pid = 4242;
//! block.want = Want::Up;
//!
//! let bytes = block.encode();
//! match StatusBlock::decode(&bytes) {
//!     Status::Loaded(decoded) => assert_eq!(decoded.pid, 4242),
//!     Status::Loading => unreachable!(),
//! }
//! ```

pub mod block;
pub mod tai64;

pub use block::{
    EncoreState, ExitCode, ExitEvent, ExitRecord, RunState, Status, StatusBlock, Want,
    DAEMONTOOLS_LEN, ENCORE_LEN, EXIT_RECORD_COUNT, EXIT_RECORD_LEN, STATUS_BLOCK_LEN,
};
pub use tai64::{Tai64, Tai64N, TAI64_EPOCH};
