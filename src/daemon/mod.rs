//! # Daemon Module
//!
//! The daemon module provides functionality for running and managing the
//! background tasks of a simulated PLC device: the register behavior tasks,
//! the backup manager and the Modbus TCP server.
//!
//! ## Components
//!
//! * **Launch Daemon**: Core implementation for starting, monitoring, and gracefully
//!   shutting down background tasks
//!
//! ## Usage
//!
//! ```no_run
//! use rust_scadasim::{config::Config, daemon::launch_daemon::Daemon};
//! use std::path::Path;
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml".as_ref(), 0)?;
//!
//!     // Create and launch daemon
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config, Path::new("backups/backup_0.yaml")).await?;
//!
//!     // Wait for shutdown signal (e.g., Ctrl+C)
//!     tokio::signal::ctrl_c().await?;
//!
//!     // Clean shutdown
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

// Re-export the Daemon struct for convenience

pub mod launch_daemon;
