//! In-memory register storage.
//!
//! Every cell is an independent atomic, so banks are shared by reference
//! between the process that owns them and every connection serving them.
//! There is no bank-wide lock: a multi-point write from one connection may
//! interleave with a read or write from another. Callers that need whole
//! requests to be atomic wrap their handler in [`Serialized`].
//!
//! [`Serialized`]: crate::Serialized

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("address {address} outside bank of {len} points")]
pub struct OutOfRange {
    pub address: usize,
    pub len: usize,
}

/// `start..start + quantity` if the whole range lies inside a bank of `len`.
pub fn checked_range(start: u16, quantity: u16, len: usize) -> Option<Range<usize>> {
    let start = usize::from(start);
    let end = start.checked_add(usize::from(quantity))?;
    if end > len {
        return None;
    }
    Some(start..end)
}

/// Fixed-length bank of single-bit points.
#[derive(Debug, Default)]
pub struct BitBank {
    values: Box<[AtomicBool]>,
}

impl BitBank {
    pub fn new(size: usize) -> Self {
        Self::from(vec![false; size])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.values.get(index).map(|v| v.load(Ordering::Relaxed))
    }

    pub fn set(&self, index: usize, value: bool) -> Result<(), OutOfRange> {
        let slot = self.values.get(index).ok_or(OutOfRange {
            address: index,
            len: self.len(),
        })?;
        slot.store(value, Ordering::Relaxed);
        Ok(())
    }

    pub fn read(&self, range: Range<usize>) -> Option<Vec<bool>> {
        let cells = self.values.get(range)?;
        Some(cells.iter().map(|v| v.load(Ordering::Relaxed)).collect())
    }

    /// Stores `values` starting at `start`. Nothing is written when any part
    /// of the range falls outside the bank.
    pub fn write(&self, start: usize, values: &[bool]) -> Result<(), OutOfRange> {
        let out_of_range = OutOfRange {
            address: start.saturating_add(values.len()),
            len: self.len(),
        };
        let end = start.checked_add(values.len()).ok_or(out_of_range)?;
        let cells = self.values.get(start..end).ok_or(out_of_range)?;
        for (cell, value) in cells.iter().zip(values) {
            cell.store(*value, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<bool> {
        self.values.iter().map(|v| v.load(Ordering::Relaxed)).collect()
    }
}

impl From<Vec<bool>> for BitBank {
    fn from(values: Vec<bool>) -> Self {
        Self {
            values: values.into_iter().map(AtomicBool::new).collect(),
        }
    }
}

/// Fixed-length bank of 16-bit registers.
#[derive(Debug, Default)]
pub struct WordBank {
    values: Box<[AtomicU16]>,
}

impl WordBank {
    pub fn new(size: usize) -> Self {
        Self::from(vec![0u16; size])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        self.values.get(index).map(|v| v.load(Ordering::Relaxed))
    }

    pub fn set(&self, index: usize, value: u16) -> Result<(), OutOfRange> {
        let slot = self.values.get(index).ok_or(OutOfRange {
            address: index,
            len: self.len(),
        })?;
        slot.store(value, Ordering::Relaxed);
        Ok(())
    }

    pub fn read(&self, range: Range<usize>) -> Option<Vec<u16>> {
        let cells = self.values.get(range)?;
        Some(cells.iter().map(|v| v.load(Ordering::Relaxed)).collect())
    }

    /// Stores `values` starting at `start`. Nothing is written when any part
    /// of the range falls outside the bank.
    pub fn write(&self, start: usize, values: &[u16]) -> Result<(), OutOfRange> {
        let out_of_range = OutOfRange {
            address: start.saturating_add(values.len()),
            len: self.len(),
        };
        let end = start.checked_add(values.len()).ok_or(out_of_range)?;
        let cells = self.values.get(start..end).ok_or(out_of_range)?;
        for (cell, value) in cells.iter().zip(values) {
            cell.store(*value, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<u16> {
        self.values.iter().map(|v| v.load(Ordering::Relaxed)).collect()
    }
}

impl From<Vec<u16>> for WordBank {
    fn from(values: Vec<u16>) -> Self {
        Self {
            values: values.into_iter().map(AtomicU16::new).collect(),
        }
    }
}

/// The four Modbus data tables.
///
/// Discrete inputs and input registers are read-only to Modbus clients; the
/// process that owns the bank fills them through the setters here.
#[derive(Debug, Default)]
pub struct RegisterBank {
    pub coils: BitBank,
    pub discrete_inputs: BitBank,
    pub input_registers: WordBank,
    pub holding_registers: WordBank,
}

impl RegisterBank {
    pub fn new(
        coil_count: usize,
        discrete_input_count: usize,
        input_register_count: usize,
        holding_register_count: usize,
    ) -> Self {
        Self {
            coils: BitBank::new(coil_count),
            discrete_inputs: BitBank::new(discrete_input_count),
            input_registers: WordBank::new(input_register_count),
            holding_registers: WordBank::new(holding_register_count),
        }
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.coils.get(usize::from(address))
    }

    pub fn discrete_input(&self, address: u16) -> Option<bool> {
        self.discrete_inputs.get(usize::from(address))
    }

    pub fn input_register(&self, address: u16) -> Option<u16> {
        self.input_registers.get(usize::from(address))
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.holding_registers.get(usize::from(address))
    }

    pub fn set_coil(&self, address: u16, value: bool) -> Result<(), OutOfRange> {
        self.coils.set(usize::from(address), value)
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) -> Result<(), OutOfRange> {
        self.discrete_inputs.set(usize::from(address), value)
    }

    pub fn set_input_register(&self, address: u16, value: u16) -> Result<(), OutOfRange> {
        self.input_registers.set(usize::from(address), value)
    }

    pub fn set_holding_register(&self, address: u16, value: u16) -> Result<(), OutOfRange> {
        self.holding_registers.set(usize::from(address), value)
    }
}
