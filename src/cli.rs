//! CLI argument parsing using clap v4

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::protocol::NotificationKind;

/// tasksync - keep running task manager instances in step
///
/// Instances on one machine elect a primary through a Unix domain socket;
/// every change announced by one instance reaches all the others.
#[derive(Parser, Debug)]
#[command(name = "tasksync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where to find configuration and the rendezvous socket
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectArgs {
    /// Path to configuration file
    #[arg(short, long, env = "TASKSYNC_CONFIG")]
    pub config: Option<String>,

    /// Rendezvous socket path, overriding the configured one
    #[arg(short, long)]
    pub socket: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join the sync group: print peer notifications, announce lines from stdin
    ///
    /// Each stdin line is `KIND ID`, e.g. `status_changed 42`.
    Run {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Announce a single change and exit
    Announce {
        /// Notification kind, e.g. created, status_changed, due-date-set
        #[arg(value_parser = parse_announce_kind)]
        kind: NotificationKind,

        /// Task identifier
        #[arg(allow_negative_numbers = true)]
        id: i64,

        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Show the rendezvous socket and whether a primary answers on it
    Status {
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Display version and build information
    Version,
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

/// Kinds a user may announce; heartbeat is reserved for the sync layer
pub fn parse_announce_kind(s: &str) -> Result<NotificationKind, String> {
    let kind: NotificationKind = s.parse().map_err(|e| format!("{}", e))?;
    if kind.is_heartbeat() {
        return Err("heartbeat is reserved and cannot be announced".to_string());
    }
    Ok(kind)
}
