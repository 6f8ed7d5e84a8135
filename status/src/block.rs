//! The supervise `status` block.
//!
//! The block grew over time and readers still meet every historical size:
//!
//! ```text
//! offset  size  field
//!      0    12  TAI64N timestamp of the last state change (big-endian)
//!     12     4  main PID, little-endian, 0 when down
//!     16     1  paused flag
//!     17     1  want flag ('u', 'd', 'o', 'O' or NUL)         <- 18 bytes: daemontools
//!     18     1  encore state                                  <- 19 bytes: encore
//!     19    68  four 17-byte exit records: start, run,
//!               restart, stop                                 <- 87 bytes: full
//! ```
//!
//! Writers always produce the full 87-byte form. Readers branch on how many
//! bytes they actually got.

use crate::tai64::{Tai64, Tai64N};
use serde::{Deserialize, Serialize};

/// Length of the original daemontools block.
pub const DAEMONTOOLS_LEN: usize = 18;

/// Length of a block carrying the encore state byte.
pub const ENCORE_LEN: usize = 19;

/// Length of one exit record.
pub const EXIT_RECORD_LEN: usize = 17;

/// Number of exit records in a full block.
pub const EXIT_RECORD_COUNT: usize = 4;

/// Length of a full block.
pub const STATUS_BLOCK_LEN: usize = ENCORE_LEN + EXIT_RECORD_COUNT * EXIT_RECORD_LEN;

const PID_OFFSET: usize = 12;
const PAUSED_OFFSET: usize = 16;
const WANT_OFFSET: usize = 17;
const STATE_OFFSET: usize = 18;

/// What the supervisor has been asked to do with the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Want {
    /// No request outstanding (NUL)
    Nothing,
    /// Keep it up ('u')
    Up,
    /// Keep it down ('d')
    Down,
    /// Run once, do not restart ('o')
    Once,
    /// Run once, encore variant ('O')
    OnceEncore,
    /// A byte this reader does not know
    Unknown(u8),
}

impl Want {
    /// Decode the want byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Want::Nothing,
            b'u' => Want::Up,
            b'd' => Want::Down,
            b'o' => Want::Once,
            b'O' => Want::OnceEncore,
            other => Want::Unknown(other),
        }
    }

    /// Encode the want byte.
    pub fn to_byte(self) -> u8 {
        match self {
            Want::Nothing => 0,
            Want::Up => b'u',
            Want::Down => b'd',
            Want::Once => b'o',
            Want::OnceEncore => b'O',
            Want::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for Want {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Want::Nothing => write!(f, "nothing"),
            Want::Up => write!(f, "up"),
            Want::Down => write!(f, "down"),
            Want::Once => write!(f, "once"),
            Want::OnceEncore => write!(f, "once (encore)"),
            Want::Unknown(byte) => write!(f, "unknown ({:#04x})", byte),
        }
    }
}

/// Extended service lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoreState {
    Stopped,
    Starting,
    Started,
    Running,
    Stopping,
    Failed,
    /// A state byte this reader does not know
    Unknown(u8),
}

impl EncoreState {
    /// Decode the state byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => EncoreState::Stopped,
            1 => EncoreState::Starting,
            2 => EncoreState::Started,
            3 => EncoreState::Running,
            4 => EncoreState::Stopping,
            5 => EncoreState::Failed,
            other => EncoreState::Unknown(other),
        }
    }

    /// Encode the state byte.
    pub fn to_byte(self) -> u8 {
        match self {
            EncoreState::Stopped => 0,
            EncoreState::Starting => 1,
            EncoreState::Started => 2,
            EncoreState::Running => 3,
            EncoreState::Stopping => 4,
            EncoreState::Failed => 5,
            EncoreState::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for EncoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncoreState::Stopped => write!(f, "stopped"),
            EncoreState::Starting => write!(f, "starting"),
            EncoreState::Started => write!(f, "started"),
            EncoreState::Running => write!(f, "running"),
            EncoreState::Stopping => write!(f, "stopping"),
            EncoreState::Failed => write!(f, "failed"),
            EncoreState::Unknown(byte) => write!(f, "unknown ({})", byte),
        }
    }
}

/// Which lifecycle event an exit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitEvent {
    Start,
    Run,
    Restart,
    Stop,
}

impl ExitEvent {
    /// Record order within the block.
    pub const ALL: [ExitEvent; EXIT_RECORD_COUNT] =
        [ExitEvent::Start, ExitEvent::Run, ExitEvent::Restart, ExitEvent::Stop];

    /// Index of this event's record.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for ExitEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitEvent::Start => write!(f, "start"),
            ExitEvent::Run => write!(f, "run"),
            ExitEvent::Restart => write!(f, "restart"),
            ExitEvent::Stop => write!(f, "stop"),
        }
    }
}

/// How a program ended, as recorded in an exit record's code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitCode {
    /// The event has not happened yet (0)
    None,
    /// Exited; the number is the exit status (1)
    Exited,
    /// Killed; the number is the signal (2)
    Signalled,
    /// Killed with a core dump; the number is the signal (3)
    CoreDumped,
    /// A code this reader does not know
    Unknown(u8),
}

impl ExitCode {
    /// Decode the code byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => ExitCode::None,
            1 => ExitCode::Exited,
            2 => ExitCode::Signalled,
            3 => ExitCode::CoreDumped,
            other => ExitCode::Unknown(other),
        }
    }

    /// Encode the code byte.
    pub fn to_byte(self) -> u8 {
        match self {
            ExitCode::None => 0,
            ExitCode::Exited => 1,
            ExitCode::Signalled => 2,
            ExitCode::CoreDumped => 3,
            ExitCode::Unknown(other) => other,
        }
    }
}

/// One 17-byte exit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRecord {
    /// What kind of ending this was
    pub code: ExitCode,
    /// Exit status or signal number
    pub number: u32,
    /// When it happened
    pub timestamp: Tai64,
}

impl ExitRecord {
    /// Record for a program that exited with a status.
    pub fn exited(status: u32, timestamp: Tai64) -> Self {
        Self {
            code: ExitCode::Exited,
            number: status,
            timestamp,
        }
    }

    /// Record for a program killed by a signal.
    pub fn signalled(signal: u32, core_dumped: bool, timestamp: Tai64) -> Self {
        Self {
            code: if core_dumped {
                ExitCode::CoreDumped
            } else {
                ExitCode::Signalled
            },
            number: signal,
            timestamp,
        }
    }

    /// Whether the program ended successfully.
    pub fn is_success(&self) -> bool {
        self.code == ExitCode::Exited && self.number == 0
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut number = [0u8; 4];
        let mut stamp = [0u8; 8];
        number.copy_from_slice(&bytes[1..5]);
        stamp.copy_from_slice(&bytes[5..EXIT_RECORD_LEN]);
        Self {
            code: ExitCode::from_byte(bytes[0]),
            number: u32::from_be_bytes(number),
            timestamp: Tai64::from_bytes(stamp),
        }
    }

    fn encode(&self, out: &mut [u8]) {
        out[0] = self.code.to_byte();
        out[1..5].copy_from_slice(&self.number.to_be_bytes());
        out[5..EXIT_RECORD_LEN].copy_from_slice(&self.timestamp.to_bytes());
    }
}

impl std::fmt::Display for ExitRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            ExitCode::None => write!(f, "never"),
            ExitCode::Exited => write!(f, "exit {}", self.number),
            ExitCode::Signalled => write!(f, "signal {}", self.number),
            ExitCode::CoreDumped => write!(f, "signal {} (core dumped)", self.number),
            ExitCode::Unknown(code) => write!(f, "code {} number {}", code, self.number),
        }
    }
}

/// Coarse category used by status and health-check tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Up,
    Down,
    Failed,
}

/// A decoded status block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBlock {
    /// Time of the last state change
    pub timestamp: Tai64N,
    /// Main PID, 0 when down
    pub pid: u32,
    /// Whether the service is paused
    pub paused: bool,
    /// Outstanding request
    pub want: Want,
    /// Encore state, absent from daemontools-sized blocks
    pub state: Option<EncoreState>,
    /// Exit records in start/run/restart/stop order, each present only if
    /// the block was long enough to hold it
    pub exits: [Option<ExitRecord>; EXIT_RECORD_COUNT],
}

/// Result of decoding whatever bytes were read from a `status` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The service is registered but its supervisor has not written a block yet
    Loading,
    /// A block of at least daemontools size
    Loaded(StatusBlock),
}

impl StatusBlock {
    /// A block for a service that is down with nothing wanted.
    pub fn new(timestamp: Tai64N) -> Self {
        Self {
            timestamp,
            pid: 0,
            paused: false,
            want: Want::Nothing,
            state: Some(EncoreState::Stopped),
            exits: [None; EXIT_RECORD_COUNT],
        }
    }

    /// Decode exactly the bytes given, never looking past them.
    pub fn decode(bytes: &[u8]) -> Status {
        if bytes.len() < DAEMONTOOLS_LEN {
            return Status::Loading;
        }

        let mut stamp = [0u8; 12];
        stamp.copy_from_slice(&bytes[..PID_OFFSET]);
        let mut pid = [0u8; 4];
        pid.copy_from_slice(&bytes[PID_OFFSET..PAUSED_OFFSET]);

        let state = if bytes.len() >= ENCORE_LEN {
            Some(EncoreState::from_byte(bytes[STATE_OFFSET]))
        } else {
            None
        };

        let mut exits = [None; EXIT_RECORD_COUNT];
        for (index, exit) in exits.iter_mut().enumerate() {
            let start = ENCORE_LEN + index * EXIT_RECORD_LEN;
            let end = start + EXIT_RECORD_LEN;
            if bytes.len() >= end {
                *exit = Some(ExitRecord::decode(&bytes[start..end]));
            }
        }

        Status::Loaded(StatusBlock {
            timestamp: Tai64N::from_bytes(stamp),
            pid: u32::from_le_bytes(pid),
            paused: bytes[PAUSED_OFFSET] != 0,
            want: Want::from_byte(bytes[WANT_OFFSET]),
            state,
            exits,
        })
    }

    /// Encode the full 87-byte form.
    ///
    /// A missing encore state is written as the one implied by the PID, and
    /// missing exit records as all-zero ("never") records.
    pub fn encode(&self) -> [u8; STATUS_BLOCK_LEN] {
        let mut out = [0u8; STATUS_BLOCK_LEN];
        out[..PID_OFFSET].copy_from_slice(&self.timestamp.to_bytes());
        out[PID_OFFSET..PAUSED_OFFSET].copy_from_slice(&self.pid.to_le_bytes());
        out[PAUSED_OFFSET] = u8::from(self.paused);
        out[WANT_OFFSET] = self.want.to_byte();
        out[STATE_OFFSET] = self.display_state().to_byte();

        for (index, exit) in self.exits.iter().enumerate() {
            let start = ENCORE_LEN + index * EXIT_RECORD_LEN;
            if let Some(exit) = exit {
                exit.encode(&mut out[start..start + EXIT_RECORD_LEN]);
            }
        }
        out
    }

    /// Whether the service has a main process.
    pub fn is_up(&self) -> bool {
        self.pid != 0
    }

    /// State to show: the encore state when present, else derived from the PID.
    pub fn display_state(&self) -> EncoreState {
        match self.state {
            Some(state) => state,
            None if self.is_up() => EncoreState::Running,
            None => EncoreState::Stopped,
        }
    }

    /// Up, down, or failed.
    pub fn run_state(&self) -> RunState {
        match self.state {
            Some(EncoreState::Failed) => RunState::Failed,
            Some(EncoreState::Stopped) => RunState::Down,
            Some(_) => RunState::Up,
            None if self.is_up() => RunState::Up,
            None => RunState::Down,
        }
    }

    /// Exit record for an event, if the block held it.
    pub fn exit(&self, event: ExitEvent) -> Option<&ExitRecord> {
        self.exits[event.index()].as_ref()
    }
}
