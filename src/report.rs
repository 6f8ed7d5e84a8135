//! Presenting decoded status blocks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use status::{ExitCode, ExitEvent, ExitRecord, RunState, Status, Tai64N, Want};
use std::fmt;
use std::path::{Path, PathBuf};

/// One exit record worth showing.
#[derive(Debug, Clone, Serialize)]
pub struct ExitReport {
    pub event: ExitEvent,
    pub record: ExitRecord,
    pub at: Option<DateTime<Utc>>,
}

/// Everything shown for one service.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub service: PathBuf,
    /// Display state, or "loading"
    pub state: String,
    pub run_state: Option<RunState>,
    pub pid: Option<u32>,
    /// Seconds since the last state change
    pub seconds: Option<u64>,
    pub since: Option<DateTime<Utc>>,
    pub want: Option<Want>,
    pub paused: bool,
    pub exits: Vec<ExitReport>,
}

impl Report {
    /// Build a report as of `now`.
    pub fn new(service: &Path, status: &Status, now: Tai64N) -> Self {
        let block = match status {
            Status::Loading => {
                return Self {
                    service: service.to_path_buf(),
                    state: "loading".to_string(),
                    run_state: None,
                    pid: None,
                    seconds: None,
                    since: None,
                    want: None,
                    paused: false,
                    exits: Vec::new(),
                }
            }
            Status::Loaded(block) => block,
        };

        let exits = ExitEvent::ALL
            .iter()
            .filter_map(|&event| {
                let record = block.exit(event)?;
                if record.code == ExitCode::None {
                    return None;
                }
                Some(ExitReport {
                    event,
                    record: *record,
                    at: record.timestamp.to_datetime(),
                })
            })
            .collect();

        Self {
            service: service.to_path_buf(),
            state: block.display_state().to_string(),
            run_state: Some(block.run_state()),
            pid: block.is_up().then_some(block.pid),
            seconds: Some(block.timestamp.seconds_until(now)),
            since: block.timestamp.to_datetime(),
            want: Some(block.want),
            paused: block.paused,
            exits,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service.display(), self.state)?;
        if let Some(pid) = self.pid {
            write!(f, " (pid {})", pid)?;
        }
        if let Some(seconds) = self.seconds {
            write!(f, " {} seconds", seconds)?;
        }
        match self.want {
            Some(Want::Nothing) | None => {}
            Some(want) => write!(f, ", want {}", want)?,
        }
        if self.paused {
            write!(f, ", paused")?;
        }
        for exit in &self.exits {
            write!(f, "\n  {}: {}", exit.event, exit.record)?;
            if let Some(at) = exit.at {
                write!(f, " at {}", at.format("%Y-%m-%d %H:%M:%S UTC"))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use status::{EncoreState, StatusBlock, Tai64, ENCORE_LEN, EXIT_RECORD_LEN};

    fn block() -> StatusBlock {
        let mut block = StatusBlock::new(Tai64N::new(Tai64::from_unix(1_700_000_000), 0));
        block.pid = 4321;
        block.want = Want::Up;
        block.state = Some(EncoreState::Running);
        block.exits[ExitEvent::Start.index()] =
            Some(ExitRecord::exited(0, Tai64::from_unix(1_699_999_999)));
        block
    }

    #[test]
    fn test_loading() {
        let report = Report::new(Path::new("/var/sv/sshd"), &Status::Loading, Tai64N::now());
        assert_eq!(report.to_string(), "/var/sv/sshd: loading");
        assert_eq!(report.run_state, None);
    }

    #[test]
    fn test_running_service() {
        let now = Tai64N::new(Tai64::from_unix(1_700_000_060), 0);
        let report = Report::new(Path::new("/var/sv/sshd"), &Status::Loaded(block()), now);

        assert_eq!(report.seconds, Some(60));
        assert_eq!(report.run_state, Some(RunState::Up));
        assert_eq!(
            report.to_string(),
            concat!(
                "/var/sv/sshd: running (pid 4321) 60 seconds, want up\n",
                "  start: exit 0 at 2023-11-14 22:13:19 UTC"
            )
        );
    }

    #[test]
    fn test_never_happened_exits_hidden() {
        let mut block = block();
        block.exits = [Some(ExitRecord {
            code: ExitCode::None,
            number: 0,
            timestamp: Tai64::default(),
        }); 4];
        let report = Report::new(Path::new("/var/sv/a"), &Status::Loaded(block), Tai64N::now());
        assert!(report.exits.is_empty());
    }

    #[test]
    fn test_down_and_paused() {
        let mut block = block();
        block.pid = 0;
        block.state = None;
        block.paused = true;
        block.want = Want::Nothing;
        block.exits = [None; 4];
        let now = block.timestamp;
        let report = Report::new(Path::new("/var/sv/a"), &Status::Loaded(block), now);

        assert_eq!(report.to_string(), "/var/sv/a: stopped 0 seconds, paused");
        assert_eq!(report.pid, None);
    }

    #[test]
    fn test_corrupt_timestamps() {
        let mut bytes = block().encode();
        bytes[..8].copy_from_slice(&0xC000_0000_0000_0000u64.to_be_bytes());
        // Seconds field of the start exit record
        let start = ENCORE_LEN + ExitEvent::Start.index() * EXIT_RECORD_LEN + 5;
        bytes[start..start + 8].copy_from_slice(&0xC000_0000_0000_0000u64.to_be_bytes());

        let status = StatusBlock::decode(&bytes);
        let report = Report::new(Path::new("/var/sv/a"), &status, Tai64N::now());
        assert_eq!(report.since, None);
        assert_eq!(report.exits[0].at, None);
        assert!(report.to_string().starts_with("/var/sv/a: running (pid 4321)"));
    }

    #[test]
    fn test_json_shape() {
        let now = Tai64N::new(Tai64::from_unix(1_700_000_000), 0);
        let report = Report::new(Path::new("/var/sv/sshd"), &Status::Loaded(block()), now);
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["state"], "running");
        assert_eq!(json["run_state"], "up");
        assert_eq!(json["pid"], 4321);
        assert_eq!(json["want"], "up");
        assert_eq!(json["exits"][0]["event"], "start");
    }
}
