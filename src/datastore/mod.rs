// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scadasim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Shared register datastore for the simulated PLC device
//!
//! The datastore holds the four standard Modbus register banks:
//!
//! - `di` - discrete input - read only, boolean
//! - `co` - coil - read and write, boolean
//! - `hr` - holding register - read and write, 16 bit
//! - `ir` - input register - read only, 16 bit
//!
//! Each bank is an ordered sequence of values addressed by absolute register
//! address; the offset into the sequence is `address - start_addr`. Every
//! access is bounds-checked and an out-of-range access yields an
//! [`AddressingError`] rather than being clamped.
//!
//! ## Thread Safety
//!
//! Each bank is protected by its own `Mutex` so the datastore can be shared
//! (`Arc<DataStore>`) between the behavior tasks, the backup manager and the
//! Modbus server. The `read_*`/`write_*` calls are atomic per call, and the
//! `update_*` methods run a caller closure while holding the bank lock so a
//! behavior task's read-modify-write cannot interleave with another writer.
//! No ordering is imposed between tasks beyond that per-access atomicity.

use std::fmt;
use std::ops::Range;
use std::sync::Mutex;

use thiserror::Error;

/// The four Modbus register bank kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankKind {
    /// Discrete input (read-only boolean)
    DiscreteInput,
    /// Coil (read-write boolean)
    Coil,
    /// Holding register (read-write 16 bit)
    HoldingRegister,
    /// Input register (read-only 16 bit)
    InputRegister,
}

impl fmt::Display for BankKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BankKind::DiscreteInput => "di",
            BankKind::Coil => "co",
            BankKind::HoldingRegister => "hr",
            BankKind::InputRegister => "ir",
        };
        write!(f, "{}", name)
    }
}

/// Error returned when a read or write falls outside a bank's address range.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("address range [{address}, {address}+{count}) is outside the {kind} bank bounds")]
pub struct AddressingError {
    /// The bank the access targeted
    pub kind: BankKind,
    /// First requested register address
    pub address: u16,
    /// Number of requested registers
    pub count: u16,
}

/// A plain, unlocked copy of one bank's layout and values.
///
/// Used both to construct a [`DataStore`] from a restored backup snapshot and
/// to carry a bank's current contents out to the backup manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankImage<T> {
    pub start_addr: u16,
    pub values: Vec<T>,
}

/// A full copy of all four banks, taken one bank at a time.
///
/// Because each bank is copied under its own lock, the image is not a single
/// consistent cut across banks: a behavior task may update one bank between
/// two bank copies. The backup format accepts that torn view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStoreImage {
    pub di: BankImage<bool>,
    pub co: BankImage<bool>,
    pub hr: BankImage<u16>,
    pub ir: BankImage<u16>,
}

/// One register bank: a fixed-layout, address-indexed sequence of values.
#[derive(Debug)]
struct Bank<T> {
    kind: BankKind,
    start_addr: u16,
    values: Vec<T>,
}

impl<T: Copy> Bank<T> {
    fn new(kind: BankKind, image: BankImage<T>) -> Self {
        Self {
            kind,
            start_addr: image.start_addr,
            values: image.values,
        }
    }

    /// Translate an absolute address range into an index range, bounds-checked.
    fn span(&self, address: u16, count: u16) -> Result<Range<usize>, AddressingError> {
        let err = AddressingError {
            kind: self.kind,
            address,
            count,
        };
        let offset = address.checked_sub(self.start_addr).ok_or_else(|| err.clone())? as usize;
        let end = offset + count as usize;
        if end > self.values.len() {
            return Err(err);
        }
        Ok(offset..end)
    }

    fn read(&self, address: u16, count: u16) -> Result<Vec<T>, AddressingError> {
        let span = self.span(address, count)?;
        Ok(self.values[span].to_vec())
    }

    fn write(&mut self, address: u16, values: &[T]) -> Result<(), AddressingError> {
        let span = self.span(address, values.len() as u16)?;
        self.values[span].copy_from_slice(values);
        Ok(())
    }

    fn update<R>(
        &mut self,
        address: u16,
        count: u16,
        f: impl FnOnce(&mut [T]) -> R,
    ) -> Result<R, AddressingError> {
        let span = self.span(address, count)?;
        Ok(f(&mut self.values[span]))
    }

    fn image(&self) -> BankImage<T> {
        BankImage {
            start_addr: self.start_addr,
            values: self.values.clone(),
        }
    }
}

/// The shared mutable datastore of the simulated device.
///
/// Constructed once at startup from the restored backup snapshot, then shared
/// by reference for the lifetime of the process between all behavior tasks,
/// the backup manager and the Modbus server.
#[derive(Debug)]
pub struct DataStore {
    discrete_inputs: Mutex<Bank<bool>>,
    coils: Mutex<Bank<bool>>,
    holding_registers: Mutex<Bank<u16>>,
    input_registers: Mutex<Bank<u16>>,
}

impl DataStore {
    /// Build the datastore from a full set of bank images.
    pub fn new(image: DataStoreImage) -> Self {
        Self {
            discrete_inputs: Mutex::new(Bank::new(BankKind::DiscreteInput, image.di)),
            coils: Mutex::new(Bank::new(BankKind::Coil, image.co)),
            holding_registers: Mutex::new(Bank::new(BankKind::HoldingRegister, image.hr)),
            input_registers: Mutex::new(Bank::new(BankKind::InputRegister, image.ir)),
        }
    }

    pub fn read_discrete_inputs(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, AddressingError> {
        self.discrete_inputs.lock().unwrap().read(address, count)
    }

    pub fn read_coils(&self, address: u16, count: u16) -> Result<Vec<bool>, AddressingError> {
        self.coils.lock().unwrap().read(address, count)
    }

    pub fn write_coils(&self, address: u16, values: &[bool]) -> Result<(), AddressingError> {
        self.coils.lock().unwrap().write(address, values)
    }

    pub fn read_holding_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, AddressingError> {
        self.holding_registers.lock().unwrap().read(address, count)
    }

    pub fn write_holding_registers(
        &self,
        address: u16,
        values: &[u16],
    ) -> Result<(), AddressingError> {
        self.holding_registers.lock().unwrap().write(address, values)
    }

    pub fn read_input_registers(
        &self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, AddressingError> {
        self.input_registers.lock().unwrap().read(address, count)
    }

    /// Run `f` over a mutable slice of the coil bank while holding its lock.
    pub fn update_coils<R>(
        &self,
        address: u16,
        count: u16,
        f: impl FnOnce(&mut [bool]) -> R,
    ) -> Result<R, AddressingError> {
        self.coils.lock().unwrap().update(address, count, f)
    }

    /// Run `f` over a mutable slice of the holding-register bank while holding
    /// its lock. This is the read-modify-write primitive the behavior tasks
    /// use: the whole closure is atomic with respect to every other writer of
    /// the bank, including the Modbus server.
    pub fn update_holding_registers<R>(
        &self,
        address: u16,
        count: u16,
        f: impl FnOnce(&mut [u16]) -> R,
    ) -> Result<R, AddressingError> {
        self.holding_registers.lock().unwrap().update(address, count, f)
    }

    /// Copy out all four banks, one bank lock at a time.
    pub fn image(&self) -> DataStoreImage {
        DataStoreImage {
            di: self.discrete_inputs.lock().unwrap().image(),
            co: self.coils.lock().unwrap().image(),
            hr: self.holding_registers.lock().unwrap().image(),
            ir: self.input_registers.lock().unwrap().image(),
        }
    }
}
