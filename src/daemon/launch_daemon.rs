// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! This module wires a restored datastore to its background tasks and
//! manages their lifecycle:
//!
//! - One task per configured register behavior
//! - The backup manager, snapshotting the datastore once per second
//! - The Modbus TCP server serving the same datastore to external clients
//!
//! ## Architecture
//!
//! The daemon uses Tokio's asynchronous runtime to manage concurrent tasks.
//! All tasks share one `running` flag; they are independently scheduled,
//! never join each other, and only observe the flag at their own timed
//! sleeps. Startup ordering is the only guarantee made: the backup manager
//! starts strictly after the datastore has been populated from the restored
//! snapshot, so the first snapshot it writes can never regress the file to
//! default values.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use crate::backup;
use crate::behavior::{self, runner, BehaviorSpec};
use crate::config::{Config, ServerConfig};
use crate::datastore::DataStore;
use crate::modbus::PlcModbusServer;

/// Interval between backup snapshots.
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);

/// Represents a daemon task manager that coordinates the device's background
/// services
///
/// This structure maintains a collection of asynchronous tasks and provides
/// methods to start, stop, and monitor them.
///
/// # Thread Safety
///
/// The `running` flag is wrapped in an `Arc` to allow safe sharing between
/// tasks. Each task checks this flag at its timed sleeps to determine if it
/// should continue running or gracefully terminate; no task is ever joined
/// or aborted while the flag is set.
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    store: Option<Arc<DataStore>>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance with an empty task list and the running
    /// flag set.
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            store: None,
        }
    }

    /// Restore the datastore and launch all tasks.
    ///
    /// Startup order:
    ///
    /// 1. Restore the backup snapshot and validate its shape against the
    ///    configuration - failure is fatal, the device never starts from
    ///    default values.
    /// 2. Build the behavior specs - a malformed behavior entry is fatal
    ///    before any task has started.
    /// 3. Start the backup manager (the datastore is now fully populated).
    /// 4. Start one task per behavior spec.
    /// 5. Start the Modbus TCP server on the configured socket.
    ///
    /// # Errors
    ///
    /// Fails on an unavailable or mismatched backup, on invalid behavior
    /// configuration, or on an unparseable server bind address.
    pub async fn launch(&mut self, config: &Config, backup_path: &Path) -> Result<()> {
        let snapshot = backup::restore(backup_path)?;
        backup::validate_shapes(&snapshot, &config.datastore)?;

        let specs = behavior::specs_from_config(&config.datastore)
            .context("Invalid behavior configuration")?;

        let store = Arc::new(DataStore::new(snapshot.into_image()));
        self.store = Some(store.clone());
        info!("Datastore restored from {}", backup_path.display());

        self.start_backup_manager(store.clone(), backup_path);
        self.start_behaviors(store.clone(), specs);
        self.start_modbus_server(&config.server, store).await?;

        Ok(())
    }

    /// Start the backup manager task.
    ///
    /// Must only be called once the datastore holds the restored values;
    /// `launch` guarantees that ordering.
    fn start_backup_manager(&mut self, store: Arc<DataStore>, backup_path: &Path) {
        info!("Starting backup manager for {}", backup_path.display());
        let task = backup::spawn_snapshot_loop(
            store,
            backup_path.to_path_buf(),
            SNAPSHOT_INTERVAL,
            self.running.clone(),
        );
        self.tasks.push(task);
    }

    /// Start one task per behavior spec.
    ///
    /// No ordering is guaranteed between the behavior tasks; each runs on
    /// its own clock from the moment it is spawned.
    fn start_behaviors(&mut self, store: Arc<DataStore>, specs: Vec<BehaviorSpec>) {
        info!("Starting {} behavior tasks", specs.len());
        for spec in specs {
            debug!("Starting behavior task {}", spec.label);
            self.tasks
                .push(runner::spawn(store.clone(), spec, self.running.clone()));
        }
    }

    /// Launch the Modbus TCP server task.
    ///
    /// External clients read and write the very same datastore the behavior
    /// tasks are mutating; every access goes through the bank locks of the
    /// datastore access layer.
    async fn start_modbus_server(
        &mut self,
        server: &ServerConfig,
        store: Arc<DataStore>,
    ) -> Result<()> {
        info!(
            "Starting modbus server on {}:{}",
            server.address, server.port
        );
        let socket_addr: SocketAddr = format!("{}:{}", server.address, server.port)
            .parse()
            .with_context(|| {
                format!("Invalid server socket address {}:{}", server.address, server.port)
            })?;

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let listener = TcpListener::bind(socket_addr).await?;
            let server = Server::new(listener);

            let on_connected = move |stream, socket_addr| {
                let store = store.clone();
                async move {
                    accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                        Ok(Some(PlcModbusServer::new(&store)))
                    })
                }
            };

            let on_process_error = |err| {
                error!("Modbus server error: {err}");
            };

            // Serve in a separate task so the running flag stays observable
            let server_handle = tokio::spawn(async move {
                if let Err(e) = server.serve(&on_connected, on_process_error).await {
                    error!("Modbus server error: {}", e);
                }
            });

            while running.load(Ordering::SeqCst) {
                // Check every second if we should continue running
                time::sleep(Duration::from_secs(1)).await;
            }

            info!("Shutting down Modbus server...");
            server_handle.abort();

            match tokio::time::timeout(Duration::from_secs(5), server_handle).await {
                Ok(_) => info!("Modbus server shut down successfully"),
                Err(_) => {
                    warn!("Modbus server shutdown timed out, forcing termination");
                }
            }

            Ok(())
        });

        self.tasks.push(task);
        info!("Modbus server started");
        Ok(())
    }

    /// Get the shared datastore, available once `launch` has restored it.
    pub fn get_store(&self) -> Option<Arc<DataStore>> {
        self.store.clone()
    }

    /// Stop all running tasks gracefully
    ///
    /// Signals all spawned tasks to terminate by clearing the shared
    /// `running` flag. This method only signals the tasks to stop; it does
    /// not wait for them to complete. To wait for all tasks to finish, call
    /// `join()` after this method.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
        // Tasks should check the running flag and terminate gracefully
    }

    /// Wait for all tasks to complete
    ///
    /// Consumes the daemon and waits for all spawned tasks to finish
    /// execution. Should be called after `shutdown()` to ensure a clean
    /// exit. Task panics are logged, not propagated; a task that outlives
    /// the timeout is left behind with a warning.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(result) => {
                    if let Err(e) = result {
                        log::error!("Task panicked: {}", e);
                    }
                }
                Err(_) => {
                    // Task didn't complete within timeout
                    log::warn!("Task did not complete within timeout period, may be hung");
                }
            }
        }
        Ok(())
    }
}
