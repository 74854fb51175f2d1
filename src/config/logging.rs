// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Logging section of the device configuration

use serde::{Deserialize, Serialize};

/// The `LOGGING` block of a device section.
///
/// `file` is either the sentinel `STDOUT` or a path to append log output to.
/// `format` is carried through from the legacy tooling; `NONE` selects the
/// default log line format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `STDOUT` or a log file path
    #[serde(default = "default_file")]
    pub file: String,

    /// Log line format, `NONE` for the default
    #[serde(default = "default_format")]
    pub format: String,

    /// Minimum level to emit
    #[serde(default)]
    pub logging_level: LoggingLevel,
}

/// Logging levels of the legacy tooling, mapped onto the `log` facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoggingLevel {
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LoggingLevel {
    /// Map the configured level onto a `log` level filter. `CRITICAL` has no
    /// direct equivalent and filters down to errors only.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LoggingLevel::Critical | LoggingLevel::Error => log::LevelFilter::Error,
            LoggingLevel::Warning => log::LevelFilter::Warn,
            LoggingLevel::Info => log::LevelFilter::Info,
            LoggingLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

impl LoggingConfig {
    /// Whether log output goes to the standard stream rather than a file.
    pub fn logs_to_stdout(&self) -> bool {
        self.file == "STDOUT"
    }
}

fn default_file() -> String {
    "STDOUT".to_string()
}

fn default_format() -> String {
    "NONE".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_file(),
            format: default_format(),
            logging_level: LoggingLevel::default(),
        }
    }
}
