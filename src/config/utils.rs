// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides validation beyond what configuration parsing itself
//! enforces: transport support, socket parameters and bank-shape sanity.
//! Behavior parameter and address-range validation lives with the behavior
//! spec construction in `crate::behavior`.

use anyhow::Result;
use log::debug;

use super::{Config, ServerKind};

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against rules that aren't covered by parsing.
///
/// ### Validation Rules
///
/// - **Transport**: only `type: tcp` with the plain framer is served; the
///   `serial`/`udp` transports of the legacy tooling are rejected.
/// - **Port Range**: the server port must be within 1-65534.
/// - **Address Format**: a malformed bind address is only warned about, the
///   bind itself will surface the error.
/// - **Bank Shapes**: every bank must hold at least one register.
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.server.kind != ServerKind::Tcp {
        anyhow::bail!(
            "Unsupported server type {:?}: only tcp is served",
            config.server.kind
        );
    }

    if config.server.framer != super::FramerKind::None {
        anyhow::bail!(
            "Unsupported framer {:?} for tcp transport",
            config.server.framer
        );
    }

    if config.server.port < 1 || config.server.port > 65534 {
        anyhow::bail!("Invalid port number: {}", config.server.port);
    }

    if !is_valid_ip_address(&config.server.address) {
        debug!(
            "Potentially invalid address format: {}",
            config.server.address
        );
        // Just issue a warning but don't block
    }

    let banks = [
        ("hr", config.datastore.hr.values.len()),
        ("ir", config.datastore.ir.values.len()),
        ("co", config.datastore.co.values.len()),
        ("di", config.datastore.di.values.len()),
    ];
    for (name, len) in banks {
        if len == 0 {
            anyhow::bail!("Bank '{}' has no registers", name);
        }
    }

    Ok(())
}
