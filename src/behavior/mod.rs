// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register behavior engine
//!
//! Each `behavior_N` entry of the configuration becomes one [`BehaviorSpec`]:
//! an immutable description of which register range evolves, on what tick
//! interval, under which rule. The daemon spawns one long-lived task per
//! spec; the task loops sleep-read-compute-write until the shared running
//! flag clears (see [`runner`]).
//!
//! Spec construction is also where behavior parameters are validated against
//! the configured bank shapes, so a bad entry aborts startup before any task
//! runs.

pub mod runner;

use anyhow::Result;
use std::time::Duration;

use crate::config::{BehaviorEntry, BitBlockConfig, DatastoreConfig};

/// The mutation rule of one behavior, with its parameters.
///
/// All rules except `Constant` act on the holding-register bank; `Constant`
/// rewrites a coil range. The coil-dependent rules additionally read one
/// gating coil each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BehaviorRule {
    /// Add `variance` to every register in range each tick, without bound
    /// (16-bit wrap-around).
    Linear { variance: u16 },
    /// While the gating coil holds its default value, ramp the first register
    /// of the range up by `variance`, clamped at `max`. Otherwise decrement
    /// the whole range by `variance`, but only when every register in the
    /// range is still above zero.
    LinearCoilDependent {
        variance: u16,
        max: u16,
        coil_address: u16,
        default_coil_value: bool,
    },
    /// Overwrite the whole range with a fresh uniform draw from
    /// `[min, max]` (inclusive on both ends) each tick.
    Random { min: u16, max: u16 },
    /// Ramp like `LinearCoilDependent` until the first register reaches
    /// `max`, then draw from `[rand_min, rand_max]` each tick until the coil
    /// leaves its default value and the range decrements back below the
    /// ceiling.
    RandomCoilDependent {
        variance: u16,
        max: u16,
        rand_min: u16,
        rand_max: u16,
        coil_address: u16,
        default_coil_value: bool,
    },
    /// Rewrite the coil range with a fixed value every tick.
    Constant { value: bool },
    /// Two-phase tank cycle: two 25-tick drains and one 100-tick refill per
    /// cycle, the dependency coil held closed during every burst.
    FuelTank {
        min: u16,
        max: u16,
        coil_address: u16,
    },
}

impl BehaviorRule {
    /// The configuration tag this rule was built from.
    pub fn kind_name(&self) -> &'static str {
        match self {
            BehaviorRule::Linear { .. } => "linear",
            BehaviorRule::LinearCoilDependent { .. } => "linear_coil_dependent",
            BehaviorRule::Random { .. } => "random",
            BehaviorRule::RandomCoilDependent { .. } => "random_coil_dependent",
            BehaviorRule::Constant { .. } => "constant",
            BehaviorRule::FuelTank { .. } => "fuel_tank_behavior",
        }
    }
}

/// One configured register behavior, ready to run.
#[derive(Debug, Clone)]
pub struct BehaviorSpec {
    /// Identity used in log lines, e.g. `hr/behavior_1 (linear)`
    pub label: String,
    /// First register address of the target range
    pub address: u16,
    /// Number of registers in the target range
    pub count: u16,
    /// Sleep between ticks
    pub interval: Duration,
    /// The mutation rule
    pub rule: BehaviorRule,
}

/// Build the behavior specs for a device from its `DATASTORE` configuration.
///
/// Holding-register entries accept every rule except `constant`; coil entries
/// accept only `constant`. `none` entries are skipped. Every target range and
/// gating coil address is checked against the configured bank shapes, so an
/// out-of-range behavior is a startup error rather than a runtime
/// addressing failure on its first tick.
pub fn specs_from_config(datastore: &DatastoreConfig) -> Result<Vec<BehaviorSpec>> {
    let mut specs = Vec::new();

    for (name, entry) in &datastore.hr.behaviors {
        if let Some(spec) = holding_spec(datastore, name, entry)? {
            specs.push(spec);
        }
    }

    for (name, entry) in &datastore.co.behaviors {
        if let Some(spec) = coil_spec(&datastore.co, name, entry)? {
            specs.push(spec);
        }
    }

    Ok(specs)
}

fn holding_spec(
    datastore: &DatastoreConfig,
    name: &str,
    entry: &BehaviorEntry,
) -> Result<Option<BehaviorSpec>> {
    let hr = &datastore.hr;
    let co = &datastore.co;

    let (time, address, count, rule) = match *entry {
        BehaviorEntry::None => return Ok(None),
        BehaviorEntry::Linear {
            time,
            address,
            count,
            variance,
        } => (time, address, count, BehaviorRule::Linear { variance }),
        BehaviorEntry::LinearCoilDependent {
            time,
            address,
            count,
            variance,
            max,
            coil_address,
            default_coil_value,
        } => {
            check_coil_address(co, name, coil_address)?;
            (
                time,
                address,
                count,
                BehaviorRule::LinearCoilDependent {
                    variance,
                    max,
                    coil_address,
                    default_coil_value: default_coil_value != 0,
                },
            )
        }
        BehaviorEntry::Random {
            time,
            address,
            count,
            min,
            max,
        } => {
            if min > max {
                anyhow::bail!("hr/{}: random range {}..{} is inverted", name, min, max);
            }
            (time, address, count, BehaviorRule::Random { min, max })
        }
        BehaviorEntry::RandomCoilDependent {
            time,
            address,
            count,
            variance,
            max,
            rand_min,
            rand_max,
            coil_address,
            default_coil_value,
        } => {
            if rand_min > rand_max {
                anyhow::bail!(
                    "hr/{}: random range {}..{} is inverted",
                    name,
                    rand_min,
                    rand_max
                );
            }
            check_coil_address(co, name, coil_address)?;
            (
                time,
                address,
                count,
                BehaviorRule::RandomCoilDependent {
                    variance,
                    max,
                    rand_min,
                    rand_max,
                    coil_address,
                    default_coil_value: default_coil_value != 0,
                },
            )
        }
        BehaviorEntry::FuelTankBehavior {
            time,
            address,
            count,
            min,
            max,
            coil_address,
        } => {
            if min > max {
                anyhow::bail!("hr/{}: tank range {}..{} is inverted", name, min, max);
            }
            check_coil_address(co, name, coil_address)?;
            (
                time,
                address,
                count,
                BehaviorRule::FuelTank {
                    min,
                    max,
                    coil_address,
                },
            )
        }
        BehaviorEntry::Constant { .. } => {
            anyhow::bail!("hr/{}: constant behavior is only valid on the coil block", name)
        }
    };

    check_range("hr", hr.start_addr, hr.values.len(), name, address, count)?;
    Ok(Some(build_spec("hr", name, time, address, count, rule)?))
}

fn coil_spec(co: &BitBlockConfig, name: &str, entry: &BehaviorEntry) -> Result<Option<BehaviorSpec>> {
    let (time, address, count, rule) = match *entry {
        BehaviorEntry::None => return Ok(None),
        BehaviorEntry::Constant {
            time,
            address,
            count,
            num,
        } => (time, address, count, BehaviorRule::Constant { value: num != 0 }),
        ref other => anyhow::bail!(
            "co/{}: behavior type is not valid on the coil block: {:?}",
            name,
            other
        ),
    };

    check_range("co", co.start_addr, co.values.len(), name, address, count)?;
    Ok(Some(build_spec("co", name, time, address, count, rule)?))
}

fn build_spec(
    bank: &str,
    name: &str,
    time: f64,
    address: u16,
    count: u16,
    rule: BehaviorRule,
) -> Result<BehaviorSpec> {
    if count == 0 {
        anyhow::bail!("{}/{}: register count must be at least 1", bank, name);
    }
    if !(time.is_finite() && time > 0.0) {
        anyhow::bail!("{}/{}: tick interval must be positive, got {}", bank, name, time);
    }
    Ok(BehaviorSpec {
        label: format!("{}/{} ({})", bank, name, rule.kind_name()),
        address,
        count,
        interval: Duration::from_secs_f64(time),
        rule,
    })
}

fn check_range(
    bank: &str,
    start_addr: u16,
    len: usize,
    name: &str,
    address: u16,
    count: u16,
) -> Result<()> {
    let in_range = address
        .checked_sub(start_addr)
        .map(|offset| offset as usize + count as usize <= len)
        .unwrap_or(false);
    if !in_range {
        anyhow::bail!(
            "{}/{}: register range [{}, {}+{}) is outside the {} bank",
            bank,
            name,
            address,
            address,
            count,
            bank
        );
    }
    Ok(())
}

fn check_coil_address(co: &BitBlockConfig, name: &str, coil_address: u16) -> Result<()> {
    check_range("co", co.start_addr, co.values.len(), name, coil_address, 1)
}
