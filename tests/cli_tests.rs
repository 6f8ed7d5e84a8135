//! CLI integration tests for the keeper tool
//!
//! These run the built binary against scratch service directories.

use rpc::{bind_control_socket, Command as RpcCommand, Transport};
use status::{EncoreState, ExitEvent, ExitRecord, StatusBlock, Tai64, Tai64N, Want};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to run keeper commands
fn run_keeper(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_keeper"))
        .args(args)
        .env_remove("KEEPER_CONTROL_SOCKET")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// A service directory with a supervise subdirectory
fn create_service_dir() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir(dir.path().join("supervise")).expect("Failed to create supervise dir");
    dir
}

fn mkfifo(path: &Path) {
    let path = CString::new(path.as_os_str().as_bytes()).unwrap();
    // SAFETY: path is a valid NUL-terminated string
    assert_eq!(unsafe { libc::mkfifo(path.as_ptr(), 0o600) }, 0);
}

/// Pretend to be a supervisor holding a pipe open for reading
fn open_reader(path: &Path) -> File {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .expect("Failed to open pipe for reading")
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

mod cli_parsing {
    use super::*;

    #[test]
    fn test_help_flag() {
        let output = run_keeper(&["--help"]);
        assert!(output.status.success());
        assert!(stdout(&output).contains("wait-ok"));
    }

    #[test]
    fn test_usage_error_exit_code() {
        let output = run_keeper(&["start"]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_user_shutdown_needs_pid() {
        let output = run_keeper(&["--user", "shutdown", "halt"]);
        assert_eq!(output.status.code(), Some(1));
    }
}

mod control_pipes {
    use super::*;

    #[test]
    fn test_missing_supervise_dir_is_permanent() {
        let dir = TempDir::new().unwrap();
        let output = run_keeper(&["is-ok", arg(dir.path())]);
        assert_eq!(output.status.code(), Some(100));
        assert!(String::from_utf8_lossy(&output.stderr).contains("No supervise directory"));
    }

    #[test]
    fn test_is_ok_without_supervisor() {
        let dir = create_service_dir();
        mkfifo(&dir.path().join("supervise/ok"));

        let output = run_keeper(&["is-ok", arg(dir.path())]);
        assert_eq!(output.status.code(), Some(100));
    }

    #[test]
    fn test_is_ok_with_supervisor() {
        let dir = create_service_dir();
        let ok = dir.path().join("supervise/ok");
        mkfifo(&ok);
        let _reader = open_reader(&ok);

        let output = run_keeper(&["is-ok", arg(dir.path())]);
        assert_eq!(output.status.code(), Some(0));
    }

    #[test]
    fn test_wait_ok_times_out() {
        let dir = create_service_dir();
        let output = run_keeper(&["wait-ok", arg(dir.path()), "--timeout", "0"]);
        assert_eq!(output.status.code(), Some(100));
    }

    #[test]
    fn test_start_and_stop_several() {
        let first = create_service_dir();
        let second = create_service_dir();
        let mut readers = Vec::new();
        for dir in [&first, &second] {
            let control = dir.path().join("supervise/control");
            mkfifo(&control);
            readers.push(open_reader(&control));
        }

        let output = run_keeper(&["start", arg(first.path()), arg(second.path())]);
        assert!(output.status.success());
        let output = run_keeper(&["stop", arg(first.path())]);
        assert!(output.status.success());

        let mut buf = [0u8; 4];
        let n = readers[0].read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ud");
        let n = readers[1].read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"u");
    }

    #[test]
    fn test_start_without_supervisor_is_permanent() {
        let dir = create_service_dir();
        mkfifo(&dir.path().join("supervise/control"));

        let output = run_keeper(&["start", arg(dir.path())]);
        assert_eq!(output.status.code(), Some(100));
    }
}

mod status_output {
    use super::*;

    fn write_status(dir: &Path, bytes: &[u8]) {
        std::fs::write(dir.join("supervise/status"), bytes).unwrap();
    }

    fn running_block() -> StatusBlock {
        let mut block = StatusBlock::new(Tai64N::now());
        block.pid = 42;
        block.want = Want::Up;
        block.state = Some(EncoreState::Running);
        block.exits[ExitEvent::Start.index()] =
            Some(ExitRecord::exited(0, Tai64::from_unix(1_700_000_000)));
        block
    }

    #[test]
    fn test_status_text() {
        let dir = create_service_dir();
        write_status(dir.path(), &running_block().encode());

        let output = run_keeper(&["status", arg(dir.path())]);
        assert!(output.status.success());
        let text = stdout(&output);
        assert!(text.contains("running (pid 42)"), "{}", text);
        assert!(text.contains("want up"), "{}", text);
        assert!(text.contains("start: exit 0"), "{}", text);
    }

    #[test]
    fn test_status_json() {
        let dir = create_service_dir();
        write_status(dir.path(), &running_block().encode());

        let output = run_keeper(&["status", "--json", arg(dir.path())]);
        assert!(output.status.success());
        let json: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
        assert_eq!(json["pid"], 42);
        assert_eq!(json["run_state"], "up");
    }

    #[test]
    fn test_status_daemontools_block() {
        let dir = create_service_dir();
        write_status(dir.path(), &running_block().encode()[..18]);

        let output = run_keeper(&["status", arg(dir.path())]);
        let text = stdout(&output);
        assert!(text.contains("running (pid 42)"), "{}", text);
        assert!(!text.contains("start:"), "{}", text);
    }

    #[test]
    fn test_status_loading() {
        let dir = create_service_dir();
        write_status(dir.path(), &[0u8; 5]);

        let output = run_keeper(&["status", arg(dir.path())]);
        assert!(output.status.success());
        assert!(stdout(&output).trim_end().ends_with(": loading"));
    }

    #[test]
    fn test_status_missing_file_is_temporary() {
        let dir = create_service_dir();
        let output = run_keeper(&["status", arg(dir.path())]);
        assert_eq!(output.status.code(), Some(111));
    }
}

mod rpc_commands {
    use super::*;

    #[test]
    fn test_load_sends_to_socket() {
        let scratch = TempDir::new().unwrap();
        let socket_path = scratch.path().join("manager/control");
        let manager = Transport::from_socket(bind_control_socket(&socket_path).unwrap());
        let service = create_service_dir();

        let output = run_keeper(&[
            "--socket",
            arg(&socket_path),
            "load",
            "sshd",
            arg(service.path()),
            "--run-on-empty",
        ]);
        assert!(output.status.success(), "{:?}", output);

        let load = manager.receive().unwrap();
        assert_eq!(load.message.command, RpcCommand::Load);
        assert_eq!(load.message.name(), b"sshd");
        assert_eq!(load.fds.len(), 2);

        let run_on_empty = manager.receive().unwrap();
        assert_eq!(run_on_empty.message.command, RpcCommand::MakeRunOnEmpty);
        assert_eq!(run_on_empty.fds.len(), 1);
    }

    #[test]
    fn test_socket_from_environment() {
        let scratch = TempDir::new().unwrap();
        let socket_path = scratch.path().join("control");
        let manager = Transport::from_socket(bind_control_socket(&socket_path).unwrap());
        let service = create_service_dir();

        let output = Command::new(env!("CARGO_BIN_EXE_keeper"))
            .args(["input-activate", arg(service.path())])
            .env("KEEPER_CONTROL_SOCKET", &socket_path)
            .output()
            .unwrap();
        assert!(output.status.success(), "{:?}", output);

        let received = manager.receive().unwrap();
        assert_eq!(received.message.command, RpcCommand::MakeInputActivated);
    }

    #[test]
    fn test_no_manager_is_temporary() {
        let scratch = TempDir::new().unwrap();
        let service = create_service_dir();
        let socket_path = scratch.path().join("nobody");

        let output = run_keeper(&["--socket", arg(&socket_path), "unload", arg(service.path())]);
        assert_eq!(output.status.code(), Some(111));
    }
}
