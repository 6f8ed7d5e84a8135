//! Keeper system manager binary.
//!
//! Runs as process #1, or with `--user` as a per-user session manager.

use clap::Parser;
use keeper_boss::{BossConfig, Init};
use keeper_rpc::Scope;
use std::path::PathBuf;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Default)]
#[command(
    name = "system-manager",
    about = "Keeper system manager - supervises the service manager and its logger",
    version
)]
struct Cli {
    /// Run as a per-user session manager
    #[arg(long)]
    user: bool,

    /// Configuration file
    #[arg(short, long, env = "KEEPER_BOSS_CONFIG")]
    config: Option<PathBuf>,

    /// Control socket path
    #[arg(long)]
    control_socket: Option<PathBuf>,

    /// Arguments forwarded to the init action
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    init_args: Vec<String>,
}

impl Cli {
    /// Process #1 cannot exit over arguments it does not understand: the
    /// kernel hands it whatever was left on its command line.
    fn parse_or_forward() -> Self {
        match Cli::try_parse() {
            Ok(cli) => cli,
            Err(e) if Init::is_pid1() => {
                warn!(error = %e, "Forwarding unparsed arguments to the init action");
                Cli {
                    init_args: std::env::args().skip(1).collect(),
                    ..Cli::default()
                }
            }
            Err(e) => e.exit(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_or_forward();
    let scope = if cli.user { Scope::User } else { Scope::System };

    let mut config = match cli.config {
        Some(ref path) => BossConfig::from_file(path, scope)?,
        None => BossConfig::for_scope(scope),
    };
    if let Some(path) = cli.control_socket {
        config.control_socket = Some(path);
    }

    let init = Init::new(config, scope, cli.init_args)?;
    if let Err(e) = init.run() {
        error!(error = %e, "System manager failed");
        return Err(e.into());
    }

    Ok(())
}
