//! OsHost against real child processes.
//!
//! `reap` waits for any child, so this binary holds a single test to keep
//! other tests from collecting its processes.

#![cfg(target_os = "linux")]

use keeper_boss::{ExitStatus, OsHost, ProcessHost, Role};
use keeper_rpc::Scope;
use nix::unistd::Pid;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn shell(script: String) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script]
}

/// Reap until `pid` has exited.
fn wait_for(host: &mut OsHost, pid: Pid) -> ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = host.reap().into_iter().find(|s| s.pid == pid) {
            return status;
        }
        assert!(Instant::now() < deadline, "{} did not exit", pid);
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Value of a `/proc/<pid>/status` mask line.
fn status_mask(report: &str, field: &str) -> u64 {
    let line = report
        .lines()
        .find(|line| line.starts_with(field))
        .unwrap_or_else(|| panic!("no {} in {:?}", field, report));
    let hex = line.split_whitespace().nth(1).unwrap();
    u64::from_str_radix(hex, 16).unwrap()
}

fn block_everything_and_ignore_usr1() {
    // SAFETY: plain libc calls on a set we initialise first
    unsafe {
        let mut all = std::mem::MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigfillset(all.as_mut_ptr());
        assert_eq!(
            libc::pthread_sigmask(libc::SIG_SETMASK, all.as_ptr(), std::ptr::null_mut()),
            0
        );
        assert_ne!(libc::signal(libc::SIGUSR1, libc::SIG_IGN), libc::SIG_ERR);
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn test_children_are_wired_and_reset() {
    let scratch = TempDir::new().unwrap();
    let (socket, _peer) = UnixDatagram::pair().unwrap();
    let mut host = OsHost::new(
        Scope::User,
        scratch.path().join("console"),
        OwnedFd::from(socket),
    )
    .unwrap();

    block_everything_and_ignore_usr1();

    // Service manager: clean signal state, socket at fd 3, stdin on /dev/null
    let manager_out = scratch.path().join("manager");
    let script = format!(
        "{{ grep -E '^(SigBlk|SigIgn):' /proc/$$/status; \
           echo \"fd3 $(readlink /proc/$$/fd/3)\"; \
           echo \"fd0 $(readlink /proc/$$/fd/0)\"; \
           echo \"LISTEN_FDS=$LISTEN_FDS\"; }} > {}",
        manager_out.display()
    );
    let pid = host.spawn(Role::ServiceManager, &shell(script)).unwrap();
    assert!(wait_for(&mut host, pid).success());

    let report = read(&manager_out);
    assert_eq!(status_mask(&report, "SigBlk:"), 0, "{}", report);
    let usr1 = 1u64 << (libc::SIGUSR1 - 1);
    assert_eq!(status_mask(&report, "SigIgn:") & usr1, 0, "{}", report);
    assert!(report.contains("fd3 socket:["), "{}", report);
    assert!(report.contains("fd0 /dev/null"), "{}", report);
    assert!(report.contains("LISTEN_FDS=1"), "{}", report);

    // Logger reads what the runner writes to the logging pipe
    let logged = scratch.path().join("logged");
    let logger = host
        .spawn(Role::Logger, &shell(format!("cat > {}", logged.display())))
        .unwrap();
    let runner = host
        .spawn(Role::ControlRunner, &shell("echo started normal".to_string()))
        .unwrap();
    assert!(wait_for(&mut host, runner).success());

    assert!(host.log_pipe_open());
    host.close_log_pipe();
    assert!(!host.log_pipe_open());

    // Last writer gone, so the logger sees end of file
    assert!(wait_for(&mut host, logger).success());
    assert_eq!(read(&logged), "started normal\n");
}
