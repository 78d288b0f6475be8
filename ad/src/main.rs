//! attachd - attachment download scheduler
//!
//! CLI entry point: runs the scheduler over a seeded record store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{info, warn};

use attachd::cli::{Cli, Command, get_log_path};
use attachd::config::Config;
use attachd::connectivity::{NetworkClass, NetworkMonitor};
use attachd::notifier::LogNotifier;
use attachd::policy::DefaultPolicy;
use attachd::scheduler::{AttachmentService, Collaborators};
use attachd::storage::CacheDir;
use attachd::store::{MemoryStore, Seed};
use attachd::HttpBackend;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            seed,
            exit_when_idle,
            dump_interval,
            network,
        } => cmd_run(config, &seed, exit_when_idle, dump_interval, network.0).await,
        Command::ShowConfig { json } => cmd_show_config(&config, json),
    }
}

/// Print the effective configuration
fn cmd_show_config(config: &Config, json: bool) -> Result<()> {
    let rendered = if json {
        serde_json::to_string_pretty(config).context("Failed to serialize config")?
    } else {
        serde_yaml::to_string(config).context("Failed to serialize config")?
    };
    println!("{}", rendered);
    Ok(())
}

/// Run the scheduler until Ctrl-C, or until idle when asked to
async fn cmd_run(config: Config, seed_path: &Path, exit_when_idle: bool, dump_interval: u64, network: NetworkClass) -> Result<()> {
    let seed = Seed::load(seed_path).context(format!("Failed to load seed from {}", seed_path.display()))?;
    let records = seed.attachments.len();
    let store = Arc::new(MemoryStore::from_seed(seed));

    let cache = CacheDir::new(&config.storage.cache_dir);
    cache.ensure().context("Failed to create cache directory")?;
    let backend = HttpBackend::new(&config.http, store.clone(), cache.root()).context("Failed to create HTTP backend")?;

    let monitor = NetworkMonitor::new(network, true);
    let service = AttachmentService::new(
        config.scheduler.clone(),
        Collaborators {
            store,
            backend: Arc::new(backend),
            connectivity: Arc::new(monitor),
            storage: Arc::new(cache.clone()),
            policy: Arc::new(DefaultPolicy::new(config.policy.clone())),
            notifier: Arc::new(LogNotifier),
        },
    );

    println!(
        "{} scheduler started: {} attachments, network {}, cache {}",
        "attachd".green().bold(),
        records,
        network,
        cache.root().display()
    );
    let handle = service.start()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut dumps = tokio::time::interval(Duration::from_secs(dump_interval.max(1)));
    let mut idle_checks = tokio::time::interval(Duration::from_millis(500));
    let mut idle_streak = 0;

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                println!("{}", "Stopping...".yellow());
                break;
            }
            _ = dumps.tick(), if dump_interval > 0 => {
                print!("{}", service.dump().await);
            }
            _ = idle_checks.tick(), if exit_when_idle => {
                if service.queue().is_empty() && service.in_flight_count().await == 0 {
                    idle_streak += 1;
                } else {
                    idle_streak = 0;
                }
                // Two quiet checks in a row so the startup rescan has run
                if idle_streak >= 2 {
                    println!("{}", "Idle, exiting".cyan());
                    break;
                }
            }
        }
    }

    service.stop();
    if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
        warn!("Scheduler did not stop within 5s");
        println!("{}", "Scheduler did not stop cleanly".red());
    }
    print!("{}", service.dump().await);
    info!("attachd exiting");
    Ok(())
}
