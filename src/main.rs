//! tasksync command-line entry point

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use tasksync::cli::{Cli, Commands, ConfigSubcommand, ConnectArgs};
use tasksync::config::{self, SyncConfig};
use tasksync::error::{Error, Result};
use tasksync::logging::{self, LogGuards};
use tasksync::protocol::{Notification, NotificationKind};
use tasksync::sync::socket;
use tasksync::{version, Coordinator};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli) {
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            print!("{}", version::build_info());
            Ok(())
        }
        Commands::Config { subcommand } => handle_config_command(subcommand),
        Commands::Status { connect } => {
            let (config, path) = load(&connect)?;
            let _log_guards = init_logging(&config, cli.verbose, cli.quiet)?;
            print_status(&config, &path);
            Ok(())
        }
        Commands::Run { connect } => {
            let (config, path) = load(&connect)?;
            let _log_guards = init_logging(&config, cli.verbose, cli.quiet)?;
            if !config.sync.enabled {
                warn!("Sync is disabled in configuration, nothing to do");
                return Ok(());
            }
            runtime()?.block_on(run_session(config, path))
        }
        Commands::Announce { kind, id, connect } => {
            let (config, path) = load(&connect)?;
            let _log_guards = init_logging(&config, cli.verbose, cli.quiet)?;
            if !config.sync.enabled {
                warn!("Sync is disabled in configuration, nothing to do");
                return Ok(());
            }
            runtime()?.block_on(announce_once(config, path, kind, id))
        }
    }
}

/// Configuration plus the socket path after command-line overrides
fn load(connect: &ConnectArgs) -> Result<(SyncConfig, PathBuf)> {
    let mut config = SyncConfig::load(connect.config.as_deref())?;
    if let Some(socket) = &connect.socket {
        config.sync.socket_path = Some(socket.to_string_lossy().into_owned());
    }

    let path = config.socket_path()?;
    socket::validate_socket_path(&path)?;
    Ok((config, path))
}

fn init_logging(config: &SyncConfig, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let guards = logging::init_logging(&config.logging, verbose, quiet)?;

    let build = version::build_info();
    debug!(
        version = %build.full_version(),
        target = %build.target,
        profile = %build.profile,
        "Starting tasksync"
    );
    Ok(guards)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("tasksync")
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))
}

// ─────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────

async fn run_session(config: SyncConfig, path: PathBuf) -> Result<()> {
    let coordinator = Coordinator::new(config.sync_options(), &path);
    coordinator.set_listener(Arc::new(|n: Notification| println!("{}", n)));
    coordinator.start().await?;

    info!(
        role = %coordinator.role(),
        path = %path.display(),
        "Sync started"
    );

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => announce_line(&coordinator, &line).await,
                Ok(None) => {
                    debug!("Input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read input");
                    break;
                }
            },
        }
    }

    coordinator.stop().await?;
    info!("Sync stopped");
    Ok(())
}

/// Parse `KIND ID` and announce it; bad lines are reported and skipped
async fn announce_line(coordinator: &Coordinator, line: &str) {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return;
    }

    let parsed = match line.split_whitespace().collect::<Vec<_>>().as_slice() {
        [kind, id] => tasksync::cli::parse_announce_kind(kind)
            .and_then(|kind| id.parse::<i64>().map(|id| (kind, id)).map_err(|e| e.to_string())),
        _ => Err("expected `KIND ID`".to_string()),
    };

    match parsed {
        Ok((kind, id)) => {
            if let Err(e) = coordinator.announce(kind, id).await {
                warn!(kind = %kind, id, error = %e, "Announcement failed");
            }
        }
        Err(reason) => eprintln!("ignored '{}': {}", line, reason),
    }
}

async fn announce_once(
    config: SyncConfig,
    path: PathBuf,
    kind: NotificationKind,
    id: i64,
) -> Result<()> {
    let coordinator = Coordinator::new(config.sync_options(), &path);
    coordinator.start().await?;

    let result = coordinator.announce(kind, id).await;
    let role = coordinator.role();
    coordinator.stop().await?;
    result?;

    println!("announced {} {} as {}", kind, id, role);
    Ok(())
}

fn print_status(config: &SyncConfig, path: &std::path::Path) {
    let primary = if socket::probe(path) {
        "running"
    } else if path.exists() {
        "stale socket"
    } else {
        "not running"
    };

    println!("socket:  {}", path.display());
    println!("mode:    {}", config.sync.mode.as_str());
    println!("enabled: {}", config.sync.enabled);
    println!("primary: {}", primary);
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = SyncConfig::load(config.as_deref())?;
            println!("{}", cfg.to_toml()?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration file created: {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            SyncConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
