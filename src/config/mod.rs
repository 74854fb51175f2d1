// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration handling for the simulated PLC device
//!
//! A master configuration file describes a whole simulated plant: a `MASTER`
//! section with the device count, and one `PLC <n>` section per device. Each
//! device process loads the file, picks its own section by device number and
//! ignores the rest, so a single file can drive any number of device
//! processes.
//!
//! ## Example
//!
//! ```no_run
//! use rust_scadasim::config::Config;
//!
//! fn example() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.example.yaml".as_ref(), 0)?;
//!     println!("device listens on port {}", config.server.port);
//!     Ok(())
//! }
//! ```

mod datastore;
mod logging;
mod server;
mod utils;

pub use datastore::{BehaviorEntry, BitBlockConfig, DatastoreConfig, WordBlockConfig};
pub use logging::{LoggingConfig, LoggingLevel};
pub use server::{FramerKind, ServerConfig, ServerKind};
pub use utils::{is_valid_ip_address, validate_specific_rules};

pub(crate) use datastore::bit_values;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of one simulated PLC device: the `PLC <n>` section of the
/// master configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Register bank layout and behaviors
    #[serde(rename = "DATASTORE")]
    pub datastore: DatastoreConfig,

    /// Field-protocol server settings
    #[serde(rename = "SERVER")]
    pub server: ServerConfig,

    /// Logging settings
    #[serde(rename = "LOGGING", default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load the configuration of device `device` from a master configuration
    /// file.
    ///
    /// The file is parsed as a whole, then the `PLC <device>` section is
    /// extracted and deserialized. A missing section or a malformed device
    /// block is a configuration error; the caller treats it as fatal.
    pub fn from_file(path: &Path, device: u32) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let master: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

        let section_name = format!("PLC {}", device);
        let section = master
            .get(&section_name)
            .with_context(|| {
                format!(
                    "Configuration file {} has no '{}' section",
                    path.display(),
                    section_name
                )
            })?
            .clone();

        let config: Config = serde_yml::from_value(section)
            .with_context(|| format!("Invalid '{}' section", section_name))?;

        Ok(config)
    }
}
