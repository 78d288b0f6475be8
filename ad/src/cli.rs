//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::connectivity::NetworkClass;

/// attachd - attachment download scheduler
#[derive(Parser)]
#[command(
    name = "ad",
    about = "Priority-scheduled attachment downloads with retry, stall detection and prefetch",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/attachd/logs/attachd.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the scheduler over records loaded from a seed file
    Run {
        /// YAML file with accounts, messages and attachments
        #[arg(short, long)]
        seed: PathBuf,

        /// Exit once nothing is queued or in flight
        #[arg(long)]
        exit_when_idle: bool,

        /// Seconds between queue dumps (0 disables)
        #[arg(short, long, default_value = "10")]
        dump_interval: u64,

        /// Network class to assume
        #[arg(short, long, default_value = "unmetered")]
        network: NetworkArg,
    },

    /// Print the effective configuration
    ShowConfig {
        /// Print JSON instead of YAML
        #[arg(long)]
        json: bool,
    },
}

/// Network class as given on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetworkArg(pub NetworkClass);

impl std::str::FromStr for NetworkArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "offline" => Ok(Self(NetworkClass::None)),
            "metered" | "cellular" => Ok(Self(NetworkClass::Metered)),
            "unmetered" | "wifi" => Ok(Self(NetworkClass::Unmetered)),
            _ => Err(format!("Unknown network: {}. Use: none, metered, or unmetered", s)),
        }
    }
}

impl std::fmt::Display for NetworkArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Path of the log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("attachd")
        .join("logs")
        .join("attachd.log")
}
