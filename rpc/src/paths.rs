//! Well-known locations of the service manager's control socket.

use std::path::PathBuf;

/// Control socket of the system-wide service manager.
pub const SYSTEM_CONTROL_SOCKET: &str = "/run/service-manager/control";

/// Which service manager instance to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// The system-wide instance run under process #1
    System,
    /// A per-user (per-session) instance
    User,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::System => write!(f, "system"),
            Scope::User => write!(f, "user"),
        }
    }
}

/// The invoking user's runtime directory.
///
/// `XDG_RUNTIME_DIR` when set, otherwise `/run/user/<uid>`.
pub fn runtime_dir() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(format!("/run/user/{}", nix::unistd::getuid())),
    }
}

/// Control socket path for an instance.
pub fn control_socket_path(scope: Scope) -> PathBuf {
    match scope {
        Scope::System => PathBuf::from(SYSTEM_CONTROL_SOCKET),
        Scope::User => runtime_dir().join("service-manager").join("control"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_path() {
        assert_eq!(
            control_socket_path(Scope::System),
            PathBuf::from("/run/service-manager/control")
        );
    }

    #[test]
    fn test_user_path_is_under_runtime_dir() {
        let path = control_socket_path(Scope::User);
        assert!(path.starts_with(runtime_dir()));
        assert!(path.ends_with("service-manager/control"));
    }
}
