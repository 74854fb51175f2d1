// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Datastore section of the device configuration
//!
//! This module defines the `DATASTORE` block of a `PLC <n>` device section:
//! the four register banks with their start address and initial values, plus
//! the `behavior_N` entries attached to the holding-register and coil banks.
//!
//! The initial `values` only matter the very first time a device is seeded
//! (see `--init-backup`); on every normal start the values come from the
//! backup file and the configuration contributes the behaviors.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// The `DATASTORE` block: one sub-block per register bank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// Holding registers (read-write 16 bit), with behaviors
    pub hr: WordBlockConfig,
    /// Input registers (read-only 16 bit)
    pub ir: WordBlockConfig,
    /// Coils (read-write boolean), with behaviors
    pub co: BitBlockConfig,
    /// Discrete inputs (read-only boolean)
    pub di: BitBlockConfig,
}

/// A 16-bit register bank block (`hr` or `ir`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordBlockConfig {
    /// Absolute address of the first register
    pub start_addr: u16,
    /// Initial register values, one per register
    pub values: Vec<u16>,
    /// `behavior_N` entries keyed by name, in order
    #[serde(flatten)]
    pub behaviors: BTreeMap<String, BehaviorEntry>,
}

/// A boolean register bank block (`co` or `di`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitBlockConfig {
    /// Absolute address of the first register
    pub start_addr: u16,
    /// Initial values, one per register; `0`/`1` and `false`/`true` both accepted
    #[serde(deserialize_with = "bit_values")]
    pub values: Vec<bool>,
    /// `behavior_N` entries keyed by name, in order
    #[serde(flatten)]
    pub behaviors: BTreeMap<String, BehaviorEntry>,
}

/// One configured register behavior, tagged by `type`.
///
/// The tag set is closed: an unknown `type` fails configuration parsing and
/// the process does not start. The `none` variant reserves a `behavior_N`
/// slot without starting a task for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BehaviorEntry {
    /// Unbounded linear ramp over the target range
    Linear {
        /// Tick interval in seconds
        time: f64,
        /// First holding-register address of the target range
        address: u16,
        /// Number of registers in the target range
        count: u16,
        /// Increment applied each tick
        variance: u16,
    },
    /// Linear ramp gated by a coil: climbs toward `max` while the coil holds
    /// its default value, backs off while it does not
    LinearCoilDependent {
        time: f64,
        address: u16,
        count: u16,
        variance: u16,
        /// Ceiling for the ramp
        max: u16,
        /// Address of the gating coil
        coil_address: u16,
        /// Coil value (0/1) treated as "default", selecting the climb branch
        default_coil_value: u8,
    },
    /// Fresh uniform draw over `[min, max]` each tick
    Random {
        time: f64,
        address: u16,
        count: u16,
        min: u16,
        max: u16,
    },
    /// Linear climb to `max`, then random draws in `[rand_min, rand_max]`
    /// until the gating coil leaves its default value
    RandomCoilDependent {
        time: f64,
        address: u16,
        count: u16,
        variance: u16,
        max: u16,
        rand_min: u16,
        rand_max: u16,
        coil_address: u16,
        default_coil_value: u8,
    },
    /// Two-drain, one-refill tank-level cycle with coil signalling
    FuelTankBehavior {
        time: f64,
        address: u16,
        count: u16,
        min: u16,
        max: u16,
        coil_address: u16,
    },
    /// Rewrite a coil range with a fixed value every tick (coil block only)
    Constant {
        time: f64,
        address: u16,
        count: u16,
        /// Value written each tick; any non-zero value closes the coil
        num: u16,
    },
    /// No behavior for this slot
    None,
}

/// Accept boolean bank values written either as YAML booleans or as `0`/`1`
/// integers (the latter is what the legacy configuration tooling emits).
pub(crate) fn bit_values<'de, D>(deserializer: D) -> Result<Vec<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Bit {
        Bool(bool),
        Int(u16),
    }

    let raw = Vec::<Bit>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|bit| match bit {
            Bit::Bool(b) => b,
            Bit::Int(n) => n != 0,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_holding_block_with_behaviors() {
        let yaml = r#"
start_addr: 1
values: [10, 20]
behavior_1:
  type: linear
  time: 5
  address: 1
  count: 1
  variance: 5
behavior_2:
  type: random
  time: 3
  address: 2
  count: 1
  min: 0
  max: 100
"#;
        let block: WordBlockConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(block.start_addr, 1);
        assert_eq!(block.values, vec![10, 20]);
        assert_eq!(block.behaviors.len(), 2);
        assert!(matches!(
            block.behaviors["behavior_1"],
            BehaviorEntry::Linear { variance: 5, .. }
        ));
        assert!(matches!(
            block.behaviors["behavior_2"],
            BehaviorEntry::Random { min: 0, max: 100, .. }
        ));
    }

    #[test]
    fn test_parse_bit_block_accepts_ints_and_bools() {
        let yaml = "start_addr: 1\nvalues: [0, 1, true, false]\n";
        let block: BitBlockConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(block.values, vec![false, true, true, false]);
    }

    #[test]
    fn test_unknown_behavior_type_is_rejected() {
        let yaml = r#"
start_addr: 1
values: [1]
behavior_1:
  type: sawtooth
  time: 1
  address: 1
  count: 1
"#;
        assert!(serde_yml::from_str::<WordBlockConfig>(yaml).is_err());
    }

    #[test]
    fn test_none_behavior_parses() {
        let yaml = "start_addr: 1\nvalues: [1]\nbehavior_1:\n  type: none\n";
        let block: BitBlockConfig = serde_yml::from_str(yaml).unwrap();
        assert!(matches!(block.behaviors["behavior_1"], BehaviorEntry::None));
    }
}
