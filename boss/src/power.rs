//! Halting, powering off and rebooting the machine.

use crate::error::Result;
use crate::intent::{Intent, PendingIntents};
use std::path::Path;
use tracing::info;

/// Type of shutdown to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ShutdownType {
    /// Power off the system
    PowerOff,
    /// Reboot the system
    Reboot,
    /// Halt the system
    Halt,
}

impl ShutdownType {
    /// What the pending fast stop intents ask for.
    ///
    /// Halt wins over power off, which wins over reboot.
    pub fn from_pending(pending: &PendingIntents) -> Self {
        if pending.is_set(Intent::FastHalt) {
            ShutdownType::Halt
        } else if pending.is_set(Intent::FastPoweroff) {
            ShutdownType::PowerOff
        } else {
            ShutdownType::Reboot
        }
    }
}

impl std::fmt::Display for ShutdownType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownType::PowerOff => write!(f, "poweroff"),
            ShutdownType::Reboot => write!(f, "reboot"),
            ShutdownType::Halt => write!(f, "halt"),
        }
    }
}

/// Whether we are running inside a container, where the machine is not ours
/// to stop.
pub fn in_container() -> bool {
    std::env::var_os("container").map_or(false, |v| !v.is_empty())
        || Path::new("/.dockerenv").exists()
        || Path::new("/run/.containerenv").exists()
}

/// Sync filesystems and stop the machine.
///
/// Only returns on failure.
pub fn shutdown(shutdown_type: ShutdownType) -> Result<()> {
    info!(shutdown_type = %shutdown_type, "Stopping the machine");

    // Sync filesystems
    unsafe {
        libc::sync();
    }

    platform_reboot(shutdown_type)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn platform_reboot(shutdown_type: ShutdownType) -> Result<()> {
    use nix::sys::reboot::{reboot, RebootMode};

    let mode = match shutdown_type {
        ShutdownType::PowerOff => RebootMode::RB_POWER_OFF,
        ShutdownType::Reboot => RebootMode::RB_AUTOBOOT,
        ShutdownType::Halt => RebootMode::RB_HALT_SYSTEM,
    };

    reboot(mode)?;
    Ok(())
}

#[cfg(target_os = "freebsd")]
fn platform_reboot(shutdown_type: ShutdownType) -> Result<()> {
    // <sys/reboot.h>
    const RB_AUTOBOOT: libc::c_int = 0;
    const RB_HALT: libc::c_int = 0x8;
    const RB_POWEROFF: libc::c_int = 0x4000;

    extern "C" {
        fn reboot(howto: libc::c_int) -> libc::c_int;
    }

    let howto = match shutdown_type {
        ShutdownType::PowerOff => RB_POWEROFF,
        ShutdownType::Reboot => RB_AUTOBOOT,
        ShutdownType::Halt => RB_HALT,
    };

    // SAFETY: reboot takes a plain flag word
    if unsafe { reboot(howto) } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn platform_reboot(_shutdown_type: ShutdownType) -> Result<()> {
    Err(crate::error::Error::Unsupported("reboot"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_reboot() {
        let pending = PendingIntents::new();
        assert_eq!(ShutdownType::from_pending(&pending), ShutdownType::Reboot);
        pending.raise(Intent::FastReboot);
        assert_eq!(ShutdownType::from_pending(&pending), ShutdownType::Reboot);
    }

    #[test]
    fn test_halt_beats_poweroff_beats_reboot() {
        let pending = PendingIntents::new();
        pending.raise(Intent::FastReboot);
        pending.raise(Intent::FastPoweroff);
        assert_eq!(ShutdownType::from_pending(&pending), ShutdownType::PowerOff);

        pending.raise(Intent::FastHalt);
        assert_eq!(ShutdownType::from_pending(&pending), ShutdownType::Halt);
    }

    #[test]
    fn test_plain_intents_do_not_choose() {
        let pending = PendingIntents::new();
        pending.raise(Intent::Halt);
        pending.raise(Intent::Poweroff);
        assert_eq!(ShutdownType::from_pending(&pending), ShutdownType::Reboot);
    }
}
