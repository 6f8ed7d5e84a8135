//! Pending intents: requested actions recorded by signal handlers.
//!
//! Each intent is an independent flag so that a handler can set one while the
//! main loop is clearing another. The set is not a queue: arrival order is
//! forgotten and actions are drained in a fixed priority order.

use std::sync::atomic::{AtomicBool, Ordering};

/// One requested action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Sysinit,
    Normal,
    Rescue,
    Emergency,
    Halt,
    Poweroff,
    Reboot,
    PowerFail,
    KbRequest,
    SecureAttentionKey,
    FastHalt,
    FastPoweroff,
    FastReboot,
    /// A signal arrived that maps to nothing
    Unknown,
}

impl Intent {
    /// Number of intents.
    pub const COUNT: usize = 14;

    /// Every intent, in declaration order.
    pub const ALL: [Intent; Intent::COUNT] = [
        Intent::Sysinit,
        Intent::Normal,
        Intent::Rescue,
        Intent::Emergency,
        Intent::Halt,
        Intent::Poweroff,
        Intent::Reboot,
        Intent::PowerFail,
        Intent::KbRequest,
        Intent::SecureAttentionKey,
        Intent::FastHalt,
        Intent::FastPoweroff,
        Intent::FastReboot,
        Intent::Unknown,
    ];

    /// Intents handed to the control-action runner, highest priority first.
    pub const ACTIONS: [Intent; 10] = [
        Intent::Sysinit,
        Intent::Normal,
        Intent::Rescue,
        Intent::Emergency,
        Intent::Halt,
        Intent::Poweroff,
        Intent::Reboot,
        Intent::PowerFail,
        Intent::KbRequest,
        Intent::SecureAttentionKey,
    ];

    /// Intents that stop the supervisor unconditionally.
    pub const STOPS: [Intent; 3] = [Intent::FastHalt, Intent::FastPoweroff, Intent::FastReboot];

    /// Whether this intent stops the supervisor.
    pub fn is_stop(self) -> bool {
        matches!(
            self,
            Intent::FastHalt | Intent::FastPoweroff | Intent::FastReboot
        )
    }

    /// Target the control-action runner is asked to start for this intent.
    pub fn target(self) -> Option<&'static str> {
        match self {
            Intent::Sysinit => Some("sysinit"),
            Intent::Normal => Some("normal"),
            Intent::Rescue => Some("rescue"),
            Intent::Emergency => Some("emergency"),
            Intent::Halt => Some("halt"),
            Intent::Poweroff => Some("poweroff"),
            Intent::Reboot => Some("reboot"),
            Intent::PowerFail => Some("powerfail"),
            Intent::KbRequest => Some("kbrequest"),
            Intent::SecureAttentionKey => Some("secure-attention-key"),
            Intent::FastHalt | Intent::FastPoweroff | Intent::FastReboot | Intent::Unknown => None,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::FastHalt => write!(f, "fast-halt"),
            Intent::FastPoweroff => write!(f, "fast-poweroff"),
            Intent::FastReboot => write!(f, "fast-reboot"),
            Intent::Unknown => write!(f, "unknown"),
            other => write!(f, "{}", other.target().unwrap_or("unknown")),
        }
    }
}

/// What woke the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A child process changed state
    Child,
    /// An intent was requested
    Intent(Intent),
}

impl Wake {
    /// Compact code stored in the signal table. Zero means "not mapped".
    pub(crate) fn to_code(self) -> u8 {
        match self {
            Wake::Child => 1,
            Wake::Intent(intent) => 2 + intent.index() as u8,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => None,
            1 => Some(Wake::Child),
            code => Intent::ALL.get(code as usize - 2).map(|&intent| Wake::Intent(intent)),
        }
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const CLEAR: AtomicBool = AtomicBool::new(false);

/// The set of pending intents plus the child-changed and init flags.
///
/// Every setter is a single lock-free store and may be called from a signal
/// handler.
#[derive(Debug)]
pub struct PendingIntents {
    intents: [AtomicBool; Intent::COUNT],
    child: AtomicBool,
    init: AtomicBool,
}

impl PendingIntents {
    /// An empty set.
    pub const fn new() -> Self {
        Self {
            intents: [CLEAR; Intent::COUNT],
            child: AtomicBool::new(false),
            init: AtomicBool::new(false),
        }
    }

    /// Record an intent.
    pub fn raise(&self, intent: Intent) {
        self.intents[intent.index()].store(true, Ordering::SeqCst);
    }

    /// Whether an intent is pending.
    pub fn is_set(&self, intent: Intent) -> bool {
        self.intents[intent.index()].load(Ordering::SeqCst)
    }

    /// Clear an intent, returning whether it was pending.
    pub fn take(&self, intent: Intent) -> bool {
        self.intents[intent.index()].swap(false, Ordering::SeqCst)
    }

    /// Record that a child changed state.
    pub fn raise_child(&self) {
        self.child.store(true, Ordering::SeqCst);
    }

    /// Clear the child-changed flag, returning whether it was set.
    pub fn take_child(&self) -> bool {
        self.child.swap(false, Ordering::SeqCst)
    }

    /// Request the one-shot init action.
    pub fn request_init(&self) {
        self.init.store(true, Ordering::SeqCst);
    }

    /// Whether the init action is still pending.
    pub fn init_requested(&self) -> bool {
        self.init.load(Ordering::SeqCst)
    }

    /// Clear the init request, returning whether it was pending.
    pub fn take_init(&self) -> bool {
        self.init.swap(false, Ordering::SeqCst)
    }

    /// Record whatever a wake stands for.
    pub fn wake(&self, wake: Wake) {
        match wake {
            Wake::Child => self.raise_child(),
            Wake::Intent(intent) => self.raise(intent),
        }
    }

    /// Whether any fast stop intent is pending.
    pub fn stop_requested(&self) -> bool {
        Intent::STOPS.iter().any(|&intent| self.is_set(intent))
    }

    /// Clear and return the highest-priority pending action intent.
    ///
    /// Lower-priority intents stay pending.
    pub fn take_next_action(&self) -> Option<Intent> {
        Intent::ACTIONS
            .iter()
            .copied()
            .find(|&intent| self.take(intent))
    }
}

impl Default for PendingIntents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears_only_that_intent() {
        let pending = PendingIntents::new();
        pending.raise(Intent::Normal);
        pending.raise(Intent::Halt);

        assert!(pending.take(Intent::Normal));
        assert!(!pending.take(Intent::Normal));
        assert!(pending.is_set(Intent::Halt));
    }

    #[test]
    fn test_next_action_follows_priority_for_every_subset() {
        for mask in 1u32..(1 << Intent::ACTIONS.len()) {
            let pending = PendingIntents::new();
            let raised: Vec<Intent> = Intent::ACTIONS
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, &intent)| intent)
                .collect();
            for &intent in &raised {
                pending.raise(intent);
            }

            let chosen = pending.take_next_action().unwrap();
            assert_eq!(chosen, raised[0], "mask {:#b}", mask);
            assert!(!pending.is_set(chosen));
            for &intent in &raised[1..] {
                assert!(pending.is_set(intent), "mask {:#b} lost {}", mask, intent);
            }
        }
    }

    #[test]
    fn test_next_action_ignores_stops() {
        let pending = PendingIntents::new();
        pending.raise(Intent::FastReboot);
        pending.raise(Intent::Unknown);
        assert_eq!(pending.take_next_action(), None);
        assert!(pending.stop_requested());
    }

    #[test]
    fn test_stop_requested_is_any_fast_intent() {
        for stop in Intent::STOPS {
            let pending = PendingIntents::new();
            assert!(!pending.stop_requested());
            pending.raise(stop);
            assert!(pending.stop_requested());
        }

        let pending = PendingIntents::new();
        pending.raise(Intent::Halt);
        pending.raise(Intent::Poweroff);
        assert!(!pending.stop_requested());
    }

    #[test]
    fn test_child_and_init_flags() {
        let pending = PendingIntents::new();
        pending.request_init();
        pending.raise_child();

        assert!(pending.init_requested());
        assert!(pending.take_init());
        assert!(!pending.take_init());
        assert!(pending.take_child());
        assert!(!pending.take_child());
    }

    #[test]
    fn test_wake_codes() {
        assert_eq!(Wake::from_code(0), None);
        assert_eq!(Wake::from_code(Wake::Child.to_code()), Some(Wake::Child));
        for intent in Intent::ALL {
            let wake = Wake::Intent(intent);
            assert_eq!(Wake::from_code(wake.to_code()), Some(wake));
        }
        assert_eq!(Wake::from_code(200), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Intent::SecureAttentionKey.to_string(), "secure-attention-key");
        assert_eq!(Intent::FastPoweroff.to_string(), "fast-poweroff");
        assert_eq!(Intent::PowerFail.to_string(), "powerfail");
    }
}
