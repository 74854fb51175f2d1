// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Behavior task loops
//!
//! One task per [`BehaviorSpec`], spawned by the daemon. Every task follows
//! the same shape: sleep for the tick interval, run one tick against the
//! shared datastore, repeat until the running flag clears. A tick's
//! read-modify-write runs under the target bank's lock, so it cannot
//! interleave with the Modbus server or another behavior writing the same
//! bank.
//!
//! A failing tick does not take the process down: the task logs the failure
//! with its behavior identity and exits; every other task and the backup
//! manager keep running.

use anyhow::Result;
use log::{debug, error};
use rand::Rng;
use rand::RngExt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use super::{BehaviorRule, BehaviorSpec};
use crate::datastore::{AddressingError, DataStore};

/// Ticks per drain burst (one burst drains a quarter of a full tank).
const DRAIN_TICKS: u32 = 25;
/// Ticks per refill burst (a full refill from empty).
const REFILL_TICKS: u32 = 100;
/// Idle ticks after each drain burst.
const IDLE_AFTER_DRAIN_TICKS: u32 = 875;
/// Idle ticks after a full two-phase cycle.
const IDLE_AFTER_CYCLE_TICKS: u32 = 900;
/// Poll granularity for interruptible idle sleeps.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Spawn the task for one behavior spec.
pub fn spawn(
    store: Arc<DataStore>,
    spec: BehaviorSpec,
    running: Arc<AtomicBool>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move { run(store, spec, running).await })
}

/// Run one behavior until the running flag clears or a tick fails.
pub async fn run(
    store: Arc<DataStore>,
    spec: BehaviorSpec,
    running: Arc<AtomicBool>,
) -> Result<()> {
    debug!("Behavior task started: {}", spec.label);

    let result = match spec.rule {
        BehaviorRule::FuelTank {
            min,
            max,
            coil_address,
        } => run_fuel_tank(&store, &spec, min, max, coil_address, &running).await,
        _ => run_periodic(&store, &spec, &running).await,
    };

    match &result {
        Ok(()) => debug!("Behavior task stopped: {}", spec.label),
        Err(e) => error!("Behavior task {} failed: {:#}", spec.label, e),
    }
    result
}

/// The simple sleep-then-tick loop shared by every rule except the tank
/// cycle.
async fn run_periodic(
    store: &DataStore,
    spec: &BehaviorSpec,
    running: &AtomicBool,
) -> Result<()> {
    // Carried across ticks by the random_coil_dependent rule only.
    let mut at_max = false;

    while running.load(Ordering::SeqCst) {
        time::sleep(spec.interval).await;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        match spec.rule {
            BehaviorRule::Linear { variance } => {
                let values = linear_tick(store, spec.address, spec.count, variance)?;
                debug!("{}: {:?}", spec.label, values);
            }
            BehaviorRule::LinearCoilDependent {
                variance,
                max,
                coil_address,
                default_coil_value,
            } => {
                let values = linear_coil_dependent_tick(
                    store,
                    spec.address,
                    spec.count,
                    variance,
                    max,
                    coil_address,
                    default_coil_value,
                )?;
                debug!("{}: {:?}", spec.label, values);
            }
            BehaviorRule::Random { min, max } => {
                let values = random_tick(store, spec.address, spec.count, min, max)?;
                debug!("{}: {:?}", spec.label, values);
            }
            BehaviorRule::RandomCoilDependent {
                variance,
                max,
                rand_min,
                rand_max,
                coil_address,
                default_coil_value,
            } => {
                let values = random_coil_dependent_tick(
                    store,
                    spec.address,
                    spec.count,
                    variance,
                    max,
                    rand_min,
                    rand_max,
                    coil_address,
                    default_coil_value,
                    &mut at_max,
                )?;
                debug!("{}: {:?}", spec.label, values);
            }
            BehaviorRule::Constant { value } => {
                let values = constant_tick(store, spec.address, spec.count, value)?;
                debug!("{}: {:?}", spec.label, values);
            }
            BehaviorRule::FuelTank { .. } => unreachable!("fuel tank runs its own loop"),
        }
    }

    Ok(())
}

/// Add `variance` to every register in range. 16-bit wrap-around is the
/// unbounded ramp's overflow semantics.
fn linear_tick(
    store: &DataStore,
    address: u16,
    count: u16,
    variance: u16,
) -> Result<Vec<u16>, AddressingError> {
    store.update_holding_registers(address, count, |regs| {
        for r in regs.iter_mut() {
            *r = r.wrapping_add(variance);
        }
        regs.to_vec()
    })
}

/// Coil at its default value: ramp the first register up, clamped at `max`.
/// Coil away from its default: decrement the whole range, all-or-nothing
/// behind the "every register still above zero" guard.
///
/// The clamp is one-sided: a register already pushed past `max` by an
/// external write is left where it is.
fn linear_coil_dependent_tick(
    store: &DataStore,
    address: u16,
    count: u16,
    variance: u16,
    max: u16,
    coil_address: u16,
    default_coil_value: bool,
) -> Result<Vec<u16>, AddressingError> {
    let coil = store.read_coils(coil_address, 1)?[0];
    store.update_holding_registers(address, count, |regs| {
        if coil == default_coil_value {
            if regs[0] < max {
                regs[0] = regs[0].saturating_add(variance).min(max);
            }
        } else if regs.iter().all(|&v| v > 0) {
            for r in regs.iter_mut() {
                *r = r.saturating_sub(variance);
            }
        }
        regs.to_vec()
    })
}

/// Overwrite the whole range with one fresh draw from `[min, max]`, both
/// bounds inclusive. Draws are independent between ticks, not cumulative.
fn random_tick(
    store: &DataStore,
    address: u16,
    count: u16,
    min: u16,
    max: u16,
) -> Result<Vec<u16>, AddressingError> {
    let value = rand::rng().random_range(min..=max);
    store.update_holding_registers(address, count, |regs| {
        regs.fill(value);
        regs.to_vec()
    })
}

/// Ramp-then-randomize. `at_max` latches once the first register reaches
/// `max` and only clears on a successful decrement tick, i.e. when the coil
/// has left its default value and every register is still above zero.
#[allow(clippy::too_many_arguments)]
fn random_coil_dependent_tick(
    store: &DataStore,
    address: u16,
    count: u16,
    variance: u16,
    max: u16,
    rand_min: u16,
    rand_max: u16,
    coil_address: u16,
    default_coil_value: bool,
    at_max: &mut bool,
) -> Result<Vec<u16>, AddressingError> {
    let coil = store.read_coils(coil_address, 1)?[0];
    store.update_holding_registers(address, count, |regs| {
        if regs[0] >= max {
            *at_max = true;
        }
        if coil == default_coil_value {
            if *at_max {
                regs[0] = rand::rng().random_range(rand_min..=rand_max);
            } else if regs[0] < max {
                regs[0] = regs[0].saturating_add(variance).min(max);
            }
        } else if regs.iter().all(|&v| v > 0) {
            *at_max = false;
            for r in regs.iter_mut() {
                *r = r.saturating_sub(variance);
            }
        }
        regs.to_vec()
    })
}

/// Rewrite the coil range with the configured value.
fn constant_tick(
    store: &DataStore,
    address: u16,
    count: u16,
    value: bool,
) -> Result<Vec<bool>, AddressingError> {
    store.update_coils(address, count, |coils| {
        coils.fill(value);
        coils.to_vec()
    })
}

/// Drop every register still above `min` by one.
fn drain_step(
    store: &DataStore,
    address: u16,
    count: u16,
    min: u16,
) -> Result<Vec<u16>, AddressingError> {
    store.update_holding_registers(address, count, |regs| {
        for r in regs.iter_mut() {
            if *r > min {
                *r -= 1;
            }
        }
        regs.to_vec()
    })
}

/// Raise every register still below `max` by one.
fn refill_step(
    store: &DataStore,
    address: u16,
    count: u16,
    max: u16,
) -> Result<Vec<u16>, AddressingError> {
    store.update_holding_registers(address, count, |regs| {
        for r in regs.iter_mut() {
            if *r < max {
                *r += 1;
            }
        }
        regs.to_vec()
    })
}

/// The tank cycle: per phase, one 25-tick drain burst then a long idle; the
/// second phase additionally runs a 100-tick refill burst; one more idle
/// closes the cycle. The dependency coil is held closed for the duration of
/// every burst and open during idles. All timing scales from the configured
/// tick interval; with a one-second interval the cycle spans roughly one
/// simulated hour.
async fn run_fuel_tank(
    store: &DataStore,
    spec: &BehaviorSpec,
    min: u16,
    max: u16,
    coil_address: u16,
    running: &AtomicBool,
) -> Result<()> {
    loop {
        for phase in 0..2u8 {
            if !running.load(Ordering::SeqCst) {
                return Ok(());
            }

            store.write_coils(coil_address, &[true])?;
            for _ in 0..DRAIN_TICKS {
                if !running.load(Ordering::SeqCst) {
                    return Ok(());
                }
                let values = drain_step(store, spec.address, spec.count, min)?;
                debug!("{}: drain {:?}", spec.label, values);
                time::sleep(spec.interval).await;
            }
            store.write_coils(coil_address, &[false])?;

            if !idle(running, spec.interval * IDLE_AFTER_DRAIN_TICKS).await {
                return Ok(());
            }

            if phase == 1 {
                debug!("{}: refill burst", spec.label);
                store.write_coils(coil_address, &[true])?;
                for _ in 0..REFILL_TICKS {
                    if !running.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                    let values = refill_step(store, spec.address, spec.count, max)?;
                    debug!("{}: refill {:?}", spec.label, values);
                    time::sleep(spec.interval).await;
                }
                store.write_coils(coil_address, &[false])?;
            }
        }

        if !idle(running, spec.interval * IDLE_AFTER_CYCLE_TICKS).await {
            return Ok(());
        }
    }
}

/// Sleep for `duration` in small slices, bailing out early when the running
/// flag clears. Returns whether the task should keep going.
async fn idle(running: &AtomicBool, duration: Duration) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let chunk = remaining.min(IDLE_POLL);
        time::sleep(chunk).await;
        remaining = remaining.saturating_sub(chunk);
    }
    running.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{BankImage, DataStoreImage};

    fn store_with(hr: Vec<u16>, co: Vec<bool>) -> DataStore {
        DataStore::new(DataStoreImage {
            di: BankImage {
                start_addr: 1,
                values: vec![false],
            },
            co: BankImage {
                start_addr: 1,
                values: co,
            },
            hr: BankImage {
                start_addr: 1,
                values: hr,
            },
            ir: BankImage {
                start_addr: 1,
                values: vec![0],
            },
        })
    }

    #[test]
    fn test_linear_is_deterministic() {
        let store = store_with(vec![3, 100], vec![false]);
        for _ in 0..10 {
            linear_tick(&store, 1, 2, 5).unwrap();
        }
        // v0 + variance * k for every register in range
        assert_eq!(store.read_holding_registers(1, 2).unwrap(), vec![53, 150]);
    }

    #[test]
    fn test_linear_wraps_at_sixteen_bits() {
        let store = store_with(vec![u16::MAX - 1], vec![false]);
        linear_tick(&store, 1, 1, 5).unwrap();
        assert_eq!(store.read_holding_registers(1, 1).unwrap(), vec![3]);
    }

    #[test]
    fn test_linear_coil_dependent_clamps_at_max() {
        let store = store_with(vec![85], vec![true]);
        for _ in 0..5 {
            linear_coil_dependent_tick(&store, 1, 1, 10, 100, 1, true).unwrap();
        }
        // 85 -> 95 -> 100, then pinned there
        assert_eq!(store.read_holding_registers(1, 1).unwrap(), vec![100]);
    }

    #[test]
    fn test_linear_coil_dependent_leaves_external_overshoot() {
        let store = store_with(vec![150], vec![true]);
        linear_coil_dependent_tick(&store, 1, 1, 10, 100, 1, true).unwrap();
        assert_eq!(store.read_holding_registers(1, 1).unwrap(), vec![150]);
    }

    #[test]
    fn test_linear_coil_dependent_decrements_when_coil_flips() {
        let store = store_with(vec![30, 25], vec![false]);
        linear_coil_dependent_tick(&store, 1, 2, 10, 100, 1, true).unwrap();
        assert_eq!(store.read_holding_registers(1, 2).unwrap(), vec![20, 15]);
    }

    #[test]
    fn test_linear_coil_dependent_floor_guard_is_all_or_nothing() {
        // One register already at zero: nothing in the range moves.
        let store = store_with(vec![30, 0], vec![false]);
        linear_coil_dependent_tick(&store, 1, 2, 10, 100, 1, true).unwrap();
        assert_eq!(store.read_holding_registers(1, 2).unwrap(), vec![30, 0]);
    }

    #[test]
    fn test_random_stays_in_bounds() {
        let store = store_with(vec![0, 0, 0], vec![false]);
        for _ in 0..200 {
            let values = random_tick(&store, 1, 3, 10, 12).unwrap();
            assert!(values.iter().all(|&v| (10..=12).contains(&v)));
            // The whole range carries the same draw
            assert!(values.windows(2).all(|w| w[0] == w[1]));
        }
    }

    #[test]
    fn test_random_single_point_range() {
        let store = store_with(vec![0], vec![false]);
        let values = random_tick(&store, 1, 1, 42, 42).unwrap();
        assert_eq!(values, vec![42]);
    }

    #[test]
    fn test_random_coil_dependent_mode_switch() {
        let store = store_with(vec![45], vec![true]);
        let mut at_max = false;

        // Climb to the ceiling
        random_coil_dependent_tick(&store, 1, 1, 10, 50, 200, 300, 1, true, &mut at_max).unwrap();
        assert_eq!(store.read_holding_registers(1, 1).unwrap(), vec![50]);
        assert!(!at_max);

        // At the ceiling the rule latches into random mode
        let values =
            random_coil_dependent_tick(&store, 1, 1, 10, 50, 200, 300, 1, true, &mut at_max)
                .unwrap();
        assert!(at_max);
        assert!((200..=300).contains(&values[0]));

        // Coil away from default: decrement resumes and the latch clears
        let before = store.read_holding_registers(1, 1).unwrap()[0];
        store.write_coils(1, &[false]).unwrap();
        let values =
            random_coil_dependent_tick(&store, 1, 1, 10, 50, 200, 300, 1, true, &mut at_max)
                .unwrap();
        assert!(!at_max);
        assert_eq!(values[0], before - 10);

        // Back at default with the latch cleared: plain climbing, no draws
        store.write_holding_registers(1, &[10]).unwrap();
        store.write_coils(1, &[true]).unwrap();
        let values =
            random_coil_dependent_tick(&store, 1, 1, 10, 50, 200, 300, 1, true, &mut at_max)
                .unwrap();
        assert_eq!(values, vec![20]);
    }

    #[test]
    fn test_random_coil_dependent_guard_blocks_decrement() {
        let store = store_with(vec![50, 0], vec![false]);
        let mut at_max = true;
        random_coil_dependent_tick(&store, 1, 2, 10, 50, 200, 300, 1, true, &mut at_max).unwrap();
        // Second register at zero: no write, latch stays
        assert_eq!(store.read_holding_registers(1, 2).unwrap(), vec![50, 0]);
        assert!(at_max);
    }

    #[test]
    fn test_constant_rewrites_coil_range() {
        let store = store_with(vec![0], vec![false, false, true]);
        let values = constant_tick(&store, 1, 3, true).unwrap();
        assert_eq!(values, vec![true, true, true]);
        assert_eq!(store.read_coils(1, 3).unwrap(), vec![true, true, true]);
    }

    #[test]
    fn test_drain_step_floors_at_min() {
        let store = store_with(vec![10, 8], vec![false]);
        for _ in 0..5 {
            drain_step(&store, 1, 2, 8).unwrap();
        }
        assert_eq!(store.read_holding_registers(1, 2).unwrap(), vec![8, 8]);
    }

    #[test]
    fn test_refill_step_caps_at_max() {
        let store = store_with(vec![98, 100], vec![false]);
        for _ in 0..5 {
            refill_step(&store, 1, 2, 100).unwrap();
        }
        assert_eq!(store.read_holding_registers(1, 2).unwrap(), vec![100, 100]);
    }

    #[test]
    fn test_full_cycle_levels_monotonic_and_bounded() {
        // One cycle worth of steps: two drain bursts and one refill burst.
        // Levels fall monotonically towards `min` while draining and rise
        // monotonically towards `max` while refilling.
        let store = store_with(vec![100, 100], vec![false]);
        let (min, max) = (60, 100);

        for _ in 0..2 {
            let mut previous = store.read_holding_registers(1, 2).unwrap();
            for _ in 0..DRAIN_TICKS {
                let values = drain_step(&store, 1, 2, min).unwrap();
                assert!(values.iter().zip(&previous).all(|(v, p)| v <= p));
                assert!(values.iter().all(|&v| v >= min));
                previous = values;
            }
        }
        // Two quarter-tank drains from full bottom out at the configured floor
        assert_eq!(store.read_holding_registers(1, 2).unwrap(), vec![60, 60]);

        let mut previous = store.read_holding_registers(1, 2).unwrap();
        for _ in 0..REFILL_TICKS {
            let values = refill_step(&store, 1, 2, max).unwrap();
            assert!(values.iter().zip(&previous).all(|(v, p)| v >= p));
            assert!(values.iter().all(|&v| v <= max));
            previous = values;
        }
        assert_eq!(store.read_holding_registers(1, 2).unwrap(), vec![100, 100]);
    }

    #[test]
    fn test_tick_against_missing_range_is_an_addressing_error() {
        let store = store_with(vec![1], vec![false]);
        assert!(linear_tick(&store, 5, 1, 1).is_err());
        assert!(constant_tick(&store, 1, 9, true).is_err());
    }

    #[tokio::test]
    async fn test_periodic_task_stops_on_flag() {
        let store = Arc::new(store_with(vec![0], vec![false]));
        let running = Arc::new(AtomicBool::new(true));
        let spec = BehaviorSpec {
            label: "hr/behavior_1 (linear)".to_string(),
            address: 1,
            count: 1,
            interval: Duration::from_millis(5),
            rule: BehaviorRule::Linear { variance: 1 },
        };

        let handle = spawn(store.clone(), spec, running.clone());
        time::sleep(Duration::from_millis(40)).await;
        running.store(false, Ordering::SeqCst);
        handle.await.unwrap().unwrap();

        let value = store.read_holding_registers(1, 1).unwrap()[0];
        assert!(value > 0);
    }

    #[tokio::test]
    async fn test_fuel_tank_drain_burst_closes_coil_and_drains() {
        let store = Arc::new(store_with(vec![60, 60], vec![false]));
        let running = Arc::new(AtomicBool::new(true));
        let spec = BehaviorSpec {
            label: "hr/behavior_1 (fuel_tank_behavior)".to_string(),
            address: 1,
            count: 2,
            interval: Duration::from_millis(5),
            rule: BehaviorRule::FuelTank {
                min: 10,
                max: 100,
                coil_address: 1,
            },
        };

        let handle = spawn(store.clone(), spec, running.clone());

        // Land in the middle of the first drain burst (25 ticks x 5ms)
        time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.read_coils(1, 1).unwrap(), vec![true]);
        let mid = store.read_holding_registers(1, 2).unwrap();
        assert!(mid[0] < 60 && mid[0] >= 10);
        assert_eq!(mid[0], mid[1]);

        // After the burst the coil opens again and the level holds
        time::sleep(Duration::from_millis(240)).await;
        assert_eq!(store.read_coils(1, 1).unwrap(), vec![false]);
        let after = store.read_holding_registers(1, 2).unwrap();
        assert_eq!(after[0], 60 - 25);

        running.store(false, Ordering::SeqCst);
        handle.await.unwrap().unwrap();
    }
}
