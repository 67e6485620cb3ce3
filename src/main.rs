//! Parking reservation service
//!
//! Headless reservation lifecycle engine: runs the late-arrival
//! reconciler every period until SIGTERM/SIGINT.
//!
//! ```sh
//! # Run with default config (~/.config/parking-reservations/config.toml)
//! parking-reservation-service
//!
//! # Custom config path
//! parking-reservation-service --config /etc/parking-reservations/config.toml
//!
//! # Validate config without starting
//! parking-reservation-service --check
//!
//! # Run a single reconciliation pass and exit
//! parking-reservation-service --once
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use parking_lifecycle::config::{default_config_path, AppConfig};
use parking_lifecycle::server::{init_tracing, ServiceHandle, ServiceOptions};

/// Parking reservation lifecycle service.
#[derive(Parser, Debug)]
#[command(
    name = "parking-reservation-service",
    version,
    about = "Parking reservation lifecycle and late-arrival reclamation",
    long_about = "Cancels preorders whose subscriber has not arrived within the grace \
                  period, frees their spot and notifies the subscriber.\n\n\
                  Default config: ~/.config/parking-reservations/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = "PARKING_CONFIG")]
    config: Option<PathBuf>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration file and exit without starting the service.
    #[arg(long)]
    check: bool,

    /// Run one reconciliation pass and exit.
    #[arg(long)]
    once: bool,

    /// Skip database migrations on startup.
    #[arg(long)]
    no_migrate: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let (mut config, load_error) = match AppConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }

    init_tracing(&config);

    match load_error {
        None => info!("Configuration loaded from {}", config_path.display()),
        Some(e) if cli.check => {
            error!("Invalid configuration {}: {}", config_path.display(), e);
            return Err(e.into());
        }
        Some(e) => {
            error!("Failed to load config from {}: {}", config_path.display(), e);
            error!("Using default configuration.");
        }
    }

    // ── Config validation mode ─────────────────────────────────
    if cli.check {
        println!("✅ Configuration is valid");
        println!("   Config file    : {}", config_path.display());
        println!("   Database       : {}", config.database.url);
        println!("   Log level      : {}", config.logging.level);
        println!(
            "   Late threshold : {} min",
            config.reconciler.late_threshold_minutes
        );
        println!("   Scan period    : {} s", config.reconciler.period_secs);
        return Ok(());
    }

    // ── Start service ──────────────────────────────────────────
    let handle = ServiceHandle::start(ServiceOptions {
        config,
        auto_migrate: !cli.no_migrate,
        start_scheduler: !cli.once,
        ..ServiceOptions::default()
    })
    .await?;

    if cli.once {
        let result = handle.reconciler.reconcile_once().await;
        handle.shutdown().await;
        let report = result?;
        println!(
            "scanned={} cancelled={} skipped={} failed={} notify_failures={}",
            report.scanned, report.cancelled, report.skipped, report.failed, report.notify_failures
        );
        return Ok(());
    }

    // Install OS signal handlers (SIGTERM, SIGINT)
    handle.install_signal_handler();

    info!("🚀 Press Ctrl+C to shutdown gracefully.");

    handle.shutdown_signal().wait().await;
    handle.wait().await;

    Ok(())
}
