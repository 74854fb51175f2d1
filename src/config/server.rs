// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Server section of the device configuration
//!
//! The `SERVER` block selects the field-protocol transport the device is
//! exposed on. Only `type: tcp` is served by this implementation; the
//! `serial` and `udp` variants of the legacy tooling still parse so an
//! existing master configuration loads, but they are rejected by validation.

use serde::{Deserialize, Serialize};

/// The `SERVER` block of a device section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Transport type
    #[serde(rename = "type")]
    pub kind: ServerKind,

    /// Wire framer; `NONE` selects plain Modbus TCP framing
    #[serde(default)]
    pub framer: FramerKind,

    /// Address to bind the server socket to
    pub address: String,

    /// TCP port to listen on
    pub port: u16,
}

/// Supported transport types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Tcp,
    Udp,
    Serial,
}

/// Wire framers of the legacy tooling. Only `NONE` (plain TCP framing) is
/// served here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FramerKind {
    #[default]
    None,
    Rtu,
    Ascii,
    Binary,
}
