// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Datastore backup and restore
//!
//! The backup file is the device's persistent state: a `DATASTORE` section
//! mirroring the four banks with only `start_addr` and the current `values`
//! per bank. Behavior metadata is never persisted; it is re-derived from the
//! configuration on every restart.
//!
//! At startup the last snapshot is restored and becomes the initial
//! datastore contents; a missing, empty or unparseable file is fatal
//! ([`BackupError`]), the device never starts from default values. While the
//! device runs, the backup manager task overwrites the snapshot once per
//! tick with a fresh copy of all four banks.
//!
//! Snapshot writes replace the whole file but are not atomic; a crash
//! mid-write can truncate it. Restore defends against that by validating the
//! parse and the bank shapes instead of trusting the file.

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::DatastoreConfig;
use crate::datastore::{BankImage, DataStore, DataStoreImage};

/// Why a backup could not be restored. Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup file {path} is missing or empty")]
    Unavailable { path: PathBuf },

    #[error("backup file {path} could not be parsed: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },

    #[error(
        "backup bank '{bank}' does not match the configured layout: \
         expected {expected} values from address {expected_start}, \
         found {found} values from address {found_start}"
    )]
    ShapeMismatch {
        bank: &'static str,
        expected: usize,
        found: usize,
        expected_start: u16,
        found_start: u16,
    },
}

/// On-disk backup layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFile {
    #[serde(rename = "DATASTORE")]
    pub datastore: DatastoreSnapshot,
}

/// The `DATASTORE` section of the backup file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreSnapshot {
    pub hr: WordBankSnapshot,
    pub ir: WordBankSnapshot,
    pub co: BitBankSnapshot,
    pub di: BitBankSnapshot,
}

/// Persisted form of a 16-bit register bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordBankSnapshot {
    pub start_addr: u16,
    pub values: Vec<u16>,
}

/// Persisted form of a boolean register bank. `0`/`1` values written by the
/// legacy tooling restore the same as `false`/`true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitBankSnapshot {
    pub start_addr: u16,
    #[serde(deserialize_with = "crate::config::bit_values")]
    pub values: Vec<bool>,
}

impl DatastoreSnapshot {
    /// Capture the current contents of a live datastore.
    pub fn capture(store: &DataStore) -> Self {
        Self::from_image(store.image())
    }

    pub fn from_image(image: DataStoreImage) -> Self {
        Self {
            hr: WordBankSnapshot {
                start_addr: image.hr.start_addr,
                values: image.hr.values,
            },
            ir: WordBankSnapshot {
                start_addr: image.ir.start_addr,
                values: image.ir.values,
            },
            co: BitBankSnapshot {
                start_addr: image.co.start_addr,
                values: image.co.values,
            },
            di: BitBankSnapshot {
                start_addr: image.di.start_addr,
                values: image.di.values,
            },
        }
    }

    pub fn into_image(self) -> DataStoreImage {
        DataStoreImage {
            hr: BankImage {
                start_addr: self.hr.start_addr,
                values: self.hr.values,
            },
            ir: BankImage {
                start_addr: self.ir.start_addr,
                values: self.ir.values,
            },
            co: BankImage {
                start_addr: self.co.start_addr,
                values: self.co.values,
            },
            di: BankImage {
                start_addr: self.di.start_addr,
                values: self.di.values,
            },
        }
    }

    /// Seed snapshot carrying a configuration's initial bank values.
    pub fn from_config(datastore: &DatastoreConfig) -> Self {
        Self {
            hr: WordBankSnapshot {
                start_addr: datastore.hr.start_addr,
                values: datastore.hr.values.clone(),
            },
            ir: WordBankSnapshot {
                start_addr: datastore.ir.start_addr,
                values: datastore.ir.values.clone(),
            },
            co: BitBankSnapshot {
                start_addr: datastore.co.start_addr,
                values: datastore.co.values.clone(),
            },
            di: BitBankSnapshot {
                start_addr: datastore.di.start_addr,
                values: datastore.di.values.clone(),
            },
        }
    }
}

/// Load the last known-good snapshot. Called once at startup; any failure is
/// fatal to the caller.
pub fn restore(path: &Path) -> Result<DatastoreSnapshot, BackupError> {
    let unavailable = || BackupError::Unavailable {
        path: path.to_path_buf(),
    };

    let metadata = std::fs::metadata(path).map_err(|_| unavailable())?;
    if metadata.len() == 0 {
        return Err(unavailable());
    }

    let contents = std::fs::read_to_string(path).map_err(|_| unavailable())?;
    let file: BackupFile = serde_yml::from_str(&contents).map_err(|source| BackupError::Corrupted {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(file.datastore)
}

/// Check a restored snapshot against the configured bank layout. A shape
/// mismatch signals a stale or torn backup and is treated like a missing one.
pub fn validate_shapes(
    snapshot: &DatastoreSnapshot,
    datastore: &DatastoreConfig,
) -> Result<(), BackupError> {
    let checks = [
        (
            "hr",
            snapshot.hr.values.len(),
            snapshot.hr.start_addr,
            datastore.hr.values.len(),
            datastore.hr.start_addr,
        ),
        (
            "ir",
            snapshot.ir.values.len(),
            snapshot.ir.start_addr,
            datastore.ir.values.len(),
            datastore.ir.start_addr,
        ),
        (
            "co",
            snapshot.co.values.len(),
            snapshot.co.start_addr,
            datastore.co.values.len(),
            datastore.co.start_addr,
        ),
        (
            "di",
            snapshot.di.values.len(),
            snapshot.di.start_addr,
            datastore.di.values.len(),
            datastore.di.start_addr,
        ),
    ];

    for (bank, found, found_start, expected, expected_start) in checks {
        if found != expected || found_start != expected_start {
            return Err(BackupError::ShapeMismatch {
                bank,
                expected,
                found,
                expected_start,
                found_start,
            });
        }
    }

    Ok(())
}

/// Overwrite the backup file with a snapshot. The write replaces the whole
/// file in place; restore validation covers the truncated-write case.
pub fn write_snapshot(path: &Path, snapshot: &DatastoreSnapshot) -> Result<()> {
    let file = BackupFile {
        datastore: snapshot.clone(),
    };
    let yaml = serde_yml::to_string(&file).context("Failed to serialize backup snapshot")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write backup file {}", path.display()))?;
    Ok(())
}

/// Create the seed backup from the configuration's initial values, the way
/// the plant startup tooling does, unless a non-empty backup already exists.
/// Returns whether a file was written.
pub fn seed(path: &Path, datastore: &DatastoreConfig) -> Result<bool> {
    let exists_non_empty = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
    if exists_non_empty {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create backup directory {}", parent.display())
            })?;
        }
    }
    write_snapshot(path, &DatastoreSnapshot::from_config(datastore))?;
    Ok(true)
}

/// Spawn the backup manager task: sleep one tick, copy out all four banks,
/// overwrite the snapshot file, forever. A failed write is logged and the
/// next tick tries again; persistence degrades, it does not stop.
pub fn spawn_snapshot_loop(
    store: Arc<DataStore>,
    path: PathBuf,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        debug!("Backup manager started for {}", path.display());
        while running.load(Ordering::SeqCst) {
            time::sleep(interval).await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let snapshot = DatastoreSnapshot::capture(&store);
            if let Err(e) = write_snapshot(&path, &snapshot) {
                error!("Backup snapshot write failed: {:#}", e);
            }
        }
        debug!("Backup manager stopped");
        Ok(())
    })
}
