// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the simulated PLC device

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use std::path::PathBuf;
use tokio::signal;

use rust_scadasim::backup;
use rust_scadasim::config::{self, Config, LoggingConfig};
use rust_scadasim::daemon::launch_daemon::Daemon;

/// Simulated PLC device serving configured register behaviors over Modbus TCP
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of the PLC device to run (selects the "PLC <N>" config section)
    #[arg(short = 'n', long = "device")]
    device: u32,

    /// Path to the master configuration file (YAML format)
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    /// Directory holding the per-device backup files
    #[arg(long = "backup-dir", default_value = "backups")]
    backup_dir: PathBuf,

    /// Create this device's seed backup from the configuration's initial
    /// values if it is missing, then exit
    #[arg(long = "init-backup", default_value_t = false)]
    init_backup: bool,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

/// Initialize the logger from the device's `LOGGING` block, with the
/// `--verbose`/`--quiet` flags taking precedence over the configured level.
fn init_logging(args: &Args, logging: &LoggingConfig) -> Result<()> {
    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        logging.logging_level.to_level_filter()
    };

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(log_level);

    if !logging.logs_to_stdout() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)
            .with_context(|| format!("Failed to open log file {}", logging.file))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load this device's section of the master configuration
    let config = Config::from_file(&args.config, args.device)?;
    config::validate_specific_rules(&config)?;

    init_logging(&args, &config.logging)?;

    let backup_path = args
        .backup_dir
        .join(format!("backup_{}.yaml", args.device));

    if args.init_backup {
        if backup::seed(&backup_path, &config.datastore)? {
            println!("Created seed backup {}", backup_path.display());
        } else {
            println!(
                "Backup {} already exists, leaving it untouched",
                backup_path.display()
            );
        }
        return Ok(());
    }

    info!("Starting PLC device {}", args.device);
    let mut daemon = Daemon::new();
    daemon.launch(&config, &backup_path).await?;

    // Wait for termination signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, terminating daemon");
            daemon.shutdown();
            daemon.join().await?;
        }
        Err(err) => {
            eprintln!("Error waiting for shutdown signal: {}", err);
        }
    }

    Ok(())
}
