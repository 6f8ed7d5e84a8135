//! Which signal means what.
//!
//! The system instance follows the conventions of the platform's own init;
//! the per-user instance treats the usual terminal signals as a plain halt.
//! Real-time signals are offsets from the platform's first one, where it has
//! any.

use crate::intent::{Intent, Wake};
use keeper_rpc::Scope;
use libc::c_int;
use nix::sys::signal::Signal;

/// Signal numbers at or above this are never mapped.
pub const MAX_SIGNAL: usize = 128;

const RT_NORMAL: c_int = 0;
const RT_RESCUE: c_int = 1;
const RT_EMERGENCY: c_int = 2;
const RT_HALT: c_int = 3;
const RT_POWEROFF: c_int = 4;
const RT_REBOOT: c_int = 5;
const RT_SYSINIT: c_int = 10;
const RT_FAST_HALT: c_int = 13;
const RT_FAST_POWEROFF: c_int = 14;
const RT_FAST_REBOOT: c_int = 15;

/// First real-time signal, if the platform has them.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn realtime_base() -> Option<c_int> {
    Some(libc::SIGRTMIN())
}

/// First real-time signal, if the platform has them.
#[cfg(target_os = "freebsd")]
pub fn realtime_base() -> Option<c_int> {
    // SIGRTMIN on FreeBSD
    Some(65)
}

/// First real-time signal, if the platform has them.
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub fn realtime_base() -> Option<c_int> {
    None
}

/// Every signal the given instance reacts to, and what it stands for.
pub fn signal_table(scope: Scope) -> Vec<(c_int, Wake)> {
    let mut table = vec![(libc::SIGCHLD, Wake::Child)];

    let realtime: &[(c_int, Intent)] = match scope {
        Scope::System => {
            table.extend(
                system_signals()
                    .iter()
                    .map(|&(signo, intent)| (signo, Wake::Intent(intent))),
            );
            &[
                (RT_NORMAL, Intent::Normal),
                (RT_RESCUE, Intent::Rescue),
                (RT_EMERGENCY, Intent::Emergency),
                (RT_HALT, Intent::Halt),
                (RT_POWEROFF, Intent::Poweroff),
                (RT_REBOOT, Intent::Reboot),
                (RT_SYSINIT, Intent::Sysinit),
                (RT_FAST_HALT, Intent::FastHalt),
                (RT_FAST_POWEROFF, Intent::FastPoweroff),
                (RT_FAST_REBOOT, Intent::FastReboot),
            ]
        }
        Scope::User => {
            for signo in [libc::SIGHUP, libc::SIGPIPE, libc::SIGINT, libc::SIGTERM] {
                table.push((signo, Wake::Intent(Intent::Halt)));
            }
            &[
                (RT_NORMAL, Intent::Normal),
                (RT_HALT, Intent::Halt),
                (RT_POWEROFF, Intent::Poweroff),
                (RT_REBOOT, Intent::Reboot),
                (RT_FAST_HALT, Intent::FastHalt),
                (RT_FAST_POWEROFF, Intent::FastPoweroff),
                (RT_FAST_REBOOT, Intent::FastReboot),
            ]
        }
    };

    if let Some(base) = realtime_base() {
        table.extend(
            realtime
                .iter()
                .map(|&(offset, intent)| (base + offset, Wake::Intent(intent))),
        );
    }

    table
}

/// The signal that requests an intent from an instance, if one does.
pub fn signal_for(scope: Scope, intent: Intent) -> Option<c_int> {
    signal_table(scope)
        .into_iter()
        .find(|&(_, wake)| wake == Wake::Intent(intent))
        .map(|(signo, _)| signo)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn system_signals() -> &'static [(c_int, Intent)] {
    &[
        (libc::SIGPWR, Intent::PowerFail),
        (libc::SIGWINCH, Intent::KbRequest),
        (libc::SIGINT, Intent::SecureAttentionKey),
    ]
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn system_signals() -> &'static [(c_int, Intent)] {
    &[
        (libc::SIGHUP, Intent::Normal),
        (libc::SIGTERM, Intent::Rescue),
        (libc::SIGUSR1, Intent::Halt),
        (libc::SIGUSR2, Intent::Poweroff),
        (libc::SIGINT, Intent::Reboot),
        (libc::SIGWINCH, Intent::KbRequest),
    ]
}

/// Human-readable name of a signal number, for logs.
pub fn signal_name(signo: c_int) -> String {
    if let Ok(signal) = Signal::try_from(signo) {
        return signal.as_str().to_string();
    }
    match realtime_base() {
        Some(base) if signo >= base => format!("SIGRTMIN+{}", signo - base),
        _ => format!("signal {}", signo),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn lookup(scope: Scope, signo: c_int) -> Option<Wake> {
        signal_table(scope)
            .into_iter()
            .find(|&(s, _)| s == signo)
            .map(|(_, wake)| wake)
    }

    #[test]
    fn test_tables_have_no_duplicate_signals() {
        for scope in [Scope::System, Scope::User] {
            let table = signal_table(scope);
            let unique: HashSet<c_int> = table.iter().map(|&(s, _)| s).collect();
            assert_eq!(unique.len(), table.len(), "{} table", scope);
            assert!(table.iter().all(|&(s, _)| s > 0 && (s as usize) < MAX_SIGNAL));
        }
    }

    #[test]
    fn test_child_signal_always_mapped() {
        for scope in [Scope::System, Scope::User] {
            assert_eq!(lookup(scope, libc::SIGCHLD), Some(Wake::Child));
        }
    }

    #[test]
    fn test_user_terminal_signals_halt() {
        for signo in [libc::SIGHUP, libc::SIGPIPE, libc::SIGINT, libc::SIGTERM] {
            assert_eq!(lookup(Scope::User, signo), Some(Wake::Intent(Intent::Halt)));
        }
    }

    #[test]
    fn test_user_table_has_no_system_targets() {
        let intents: Vec<Wake> = signal_table(Scope::User).into_iter().map(|(_, w)| w).collect();
        for intent in [
            Intent::Sysinit,
            Intent::Rescue,
            Intent::Emergency,
            Intent::PowerFail,
            Intent::KbRequest,
            Intent::SecureAttentionKey,
        ] {
            assert!(!intents.contains(&Wake::Intent(intent)), "{}", intent);
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_system_table() {
        let base = libc::SIGRTMIN();
        assert_eq!(lookup(Scope::System, libc::SIGPWR), Some(Wake::Intent(Intent::PowerFail)));
        assert_eq!(lookup(Scope::System, libc::SIGWINCH), Some(Wake::Intent(Intent::KbRequest)));
        assert_eq!(
            lookup(Scope::System, libc::SIGINT),
            Some(Wake::Intent(Intent::SecureAttentionKey))
        );
        assert_eq!(lookup(Scope::System, base), Some(Wake::Intent(Intent::Normal)));
        assert_eq!(lookup(Scope::System, base + 10), Some(Wake::Intent(Intent::Sysinit)));
        assert_eq!(lookup(Scope::System, base + 13), Some(Wake::Intent(Intent::FastHalt)));
        assert_eq!(lookup(Scope::System, base + 14), Some(Wake::Intent(Intent::FastPoweroff)));
        assert_eq!(lookup(Scope::System, base + 15), Some(Wake::Intent(Intent::FastReboot)));
        assert_eq!(lookup(Scope::System, libc::SIGTERM), None);
    }

    #[test]
    fn test_signal_for_round_trips_through_table() {
        for scope in [Scope::System, Scope::User] {
            for (_, wake) in signal_table(scope) {
                if let Wake::Intent(intent) = wake {
                    let chosen = signal_for(scope, intent).unwrap();
                    assert_eq!(lookup(scope, chosen), Some(Wake::Intent(intent)));
                }
            }
        }
        assert_eq!(signal_for(Scope::User, Intent::Rescue), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(libc::SIGCHLD), "SIGCHLD");
        assert_eq!(signal_name(libc::SIGRTMIN() + 4), "SIGRTMIN+4");
    }
}
