mod report;

use anyhow::{anyhow, bail, Context, Result};
use boss::signals::{signal_for, signal_name};
use boss::Intent;
use clap::{Parser, Subcommand, ValueEnum};
use report::Report;
use rpc::{control_socket_path, RpcClient, Scope, SuperviseDir};
use status::Tai64N;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Exit status for a permanent failure or a logical "no".
const EXIT_PERMANENT: u8 = 100;

/// Exit status for a temporary failure.
const EXIT_TEMPORARY: u8 = 111;

/// Keeper - control a running service manager and its services
#[derive(Parser, Debug)]
#[command(name = "keeper", author, version, about, long_about = None)]
struct Cli {
    /// Address the per-user service manager instead of the system one
    #[arg(long, global = true)]
    user: bool,

    /// Control socket of the service manager
    #[arg(long, env = "KEEPER_CONTROL_SOCKET", global = true)]
    socket: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a service with the service manager
    Load {
        /// Service name
        name: String,
        /// Service directory
        service_dir: PathBuf,
        /// Give the service an input pipe other services can be plumbed into
        #[arg(long)]
        pipe: bool,
        /// Start the service whenever its input pipe is empty
        #[arg(long)]
        run_on_empty: bool,
    },
    /// Make the service manager forget a service
    Unload {
        /// Service directory
        service_dir: PathBuf,
    },
    /// Connect one service's output to another's input
    Plumb {
        /// Service whose output is connected
        out_dir: PathBuf,
        /// Service that receives it, typically a log service
        in_dir: PathBuf,
    },
    /// Start a service when input arrives on its pipe
    InputActivate {
        /// Service directory
        service_dir: PathBuf,
    },
    /// Bring services up
    Start {
        /// Service directories
        #[arg(required = true)]
        service_dirs: Vec<PathBuf>,
    },
    /// Take services down
    Stop {
        /// Service directories
        #[arg(required = true)]
        service_dirs: Vec<PathBuf>,
    },
    /// Succeed if a supervisor is running for the service
    IsOk {
        /// Service directory
        service_dir: PathBuf,
    },
    /// Wait for a supervisor to appear
    WaitOk {
        /// Service directory
        service_dir: PathBuf,
        /// Give up after this many milliseconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show service status
    Status {
        /// Service directories
        #[arg(required = true)]
        service_dirs: Vec<PathBuf>,
        /// Print one JSON object per service
        #[arg(long)]
        json: bool,
    },
    /// Ask the system manager to stop the machine or session
    Shutdown {
        /// What to do once stopped
        #[arg(value_enum)]
        action: Action,
        /// Stop without running the orderly shutdown action
        #[arg(long)]
        force: bool,
        /// Process ID of the system manager (1 unless --user)
        #[arg(long)]
        pid: Option<i32>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Halt,
    Poweroff,
    Reboot,
}

impl Action {
    fn intent(self, force: bool) -> Intent {
        match (self, force) {
            (Action::Halt, false) => Intent::Halt,
            (Action::Poweroff, false) => Intent::Poweroff,
            (Action::Reboot, false) => Intent::Reboot,
            (Action::Halt, true) => Intent::FastHalt,
            (Action::Poweroff, true) => Intent::FastPoweroff,
            (Action::Reboot, true) => Intent::FastReboot,
        }
    }
}

/// A command that ran to completion either succeeded or answered "no".
enum Outcome {
    Success,
    No,
}

fn main() -> ExitCode {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(Outcome::Success) => ExitCode::SUCCESS,
        Ok(Outcome::No) => ExitCode::from(EXIT_PERMANENT),
        Err(e) => {
            eprintln!("keeper: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

fn run(cli: &Cli) -> Result<Outcome> {
    let scope = if cli.user { Scope::User } else { Scope::System };

    match &cli.command {
        Commands::Load {
            name,
            service_dir,
            pipe,
            run_on_empty,
        } => {
            let supervise = SuperviseDir::for_service(service_dir)?;
            let service = File::open(service_dir)
                .with_context(|| format!("Failed to open {}", service_dir.display()))?;
            connect(cli, scope)?.load(name, &supervise, &service, *pipe, *run_on_empty)?;
        }

        Commands::Unload { service_dir } => {
            let supervise = SuperviseDir::for_service(service_dir)?;
            connect(cli, scope)?.unload(&supervise)?;
        }

        Commands::Plumb { out_dir, in_dir } => {
            let output = SuperviseDir::for_service(out_dir)?;
            let input = SuperviseDir::for_service(in_dir)?;
            connect(cli, scope)?.plumb(&output, &input)?;
        }

        Commands::InputActivate { service_dir } => {
            let supervise = SuperviseDir::for_service(service_dir)?;
            connect(cli, scope)?.make_input_activated(&supervise)?;
        }

        Commands::Start { service_dirs } => {
            for dir in service_dirs {
                SuperviseDir::for_service(dir)?.start()?;
            }
        }

        Commands::Stop { service_dirs } => {
            for dir in service_dirs {
                SuperviseDir::for_service(dir)?.stop()?;
            }
        }

        Commands::IsOk { service_dir } => {
            if !SuperviseDir::for_service(service_dir)?.is_ok()? {
                return Ok(Outcome::No);
            }
        }

        Commands::WaitOk {
            service_dir,
            timeout,
        } => {
            let supervise = SuperviseDir::for_service(service_dir)?;
            if !supervise.wait_ok(timeout.map(Duration::from_millis))? {
                return Ok(Outcome::No);
            }
        }

        Commands::Status { service_dirs, json } => {
            let now = Tai64N::now();
            for dir in service_dirs {
                let status = SuperviseDir::for_service(dir)?.read_status()?;
                let report = Report::new(dir, &status, now);
                if *json {
                    println!("{}", serde_json::to_string(&report)?);
                } else {
                    println!("{}", report);
                }
            }
        }

        Commands::Shutdown { action, force, pid } => {
            let intent = action.intent(*force);
            let signo = signal_for(scope, intent)
                .ok_or_else(|| anyhow!("No signal requests {} on this platform", intent))?;
            let pid = match (pid, scope) {
                (Some(pid), _) => *pid,
                (None, Scope::System) => 1,
                (None, Scope::User) => bail!("--pid is required with --user"),
            };

            // SAFETY: kill takes plain integers
            if unsafe { libc::kill(pid, signo) } < 0 {
                return Err(std::io::Error::last_os_error())
                    .with_context(|| format!("Failed to signal process {}", pid));
            }
            info!(
                pid = pid,
                signal = %signal_name(signo),
                intent = %intent,
                "Signalled system manager"
            );
        }
    }

    Ok(Outcome::Success)
}

fn connect(cli: &Cli, scope: Scope) -> Result<RpcClient> {
    let path = cli
        .socket
        .clone()
        .unwrap_or_else(|| control_socket_path(scope));
    Ok(RpcClient::connect(path)?)
}

/// Map a failure onto the daemontools exit status convention.
fn exit_status(error: &anyhow::Error) -> u8 {
    if let Some(e) = error.downcast_ref::<rpc::Error>() {
        return if e.is_permanent() {
            EXIT_PERMANENT
        } else {
            EXIT_TEMPORARY
        };
    }
    if error.downcast_ref::<std::io::Error>().is_some() {
        return EXIT_TEMPORARY;
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_force_selects_fast_intents() {
        assert_eq!(Action::Halt.intent(false), Intent::Halt);
        assert_eq!(Action::Halt.intent(true), Intent::FastHalt);
        assert_eq!(Action::Poweroff.intent(true), Intent::FastPoweroff);
        assert_eq!(Action::Reboot.intent(true), Intent::FastReboot);
    }

    #[test]
    fn test_exit_status_mapping() {
        let permanent = anyhow::Error::from(rpc::Error::NotRunning(PathBuf::from("/var/sv/a")));
        assert_eq!(exit_status(&permanent), EXIT_PERMANENT);

        let temporary = anyhow::Error::from(rpc::Error::Io(std::io::Error::from_raw_os_error(
            libc::EACCES,
        )));
        assert_eq!(exit_status(&temporary), EXIT_TEMPORARY);

        let io = Err::<(), _>(std::io::Error::from_raw_os_error(libc::ENOENT))
            .context("Failed to open /var/sv/a")
            .unwrap_err();
        assert_eq!(exit_status(&io), EXIT_TEMPORARY);

        assert_eq!(exit_status(&anyhow!("--pid is required with --user")), 1);
    }

    #[test]
    fn test_parse_wait_ok_timeout() {
        let cli =
            Cli::try_parse_from(["keeper", "wait-ok", "/var/sv/a", "--timeout", "2500"]).unwrap();
        match cli.command {
            Commands::WaitOk { timeout, .. } => assert_eq!(timeout, Some(2500)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_user_flag() {
        let cli = Cli::try_parse_from([
            "keeper",
            "load",
            "sshd",
            "/var/sv/sshd",
            "--user",
            "--pipe",
        ])
        .unwrap();
        assert!(cli.user);
        assert!(matches!(cli.command, Commands::Load { pipe: true, run_on_empty: false, .. }));
    }
}
