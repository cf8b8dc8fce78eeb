// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use crate::error::PciError;

/// A 32-bit register aperture, usually one mapped PCI BAR.
///
/// Offsets are byte offsets from the start of the window and must be 4 byte aligned.
pub trait RegisterWindow: Send + Sync {
    fn len(&self) -> usize;

    fn read32(&self, offset: usize) -> Result<u32, PciError>;
    fn write32(&self, offset: usize, value: u32) -> Result<(), PciError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[inline]
fn check_access(offset: usize, len: usize) -> Result<(), PciError> {
    if offset % std::mem::align_of::<u32>() != 0 || offset + std::mem::size_of::<u32>() > len {
        return Err(PciError::OutOfRange { offset, len });
    }
    Ok(())
}

/// A BAR mapped through its sysfs `resourceN` file.
pub struct MmapWindow {
    mapping: memmap2::MmapMut,
}

impl MmapWindow {
    pub fn open(path: &std::path::Path) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        let mapping = unsafe { memmap2::MmapOptions::new().map_mut(&file)? };

        Ok(Self { mapping })
    }
}

impl RegisterWindow for MmapWindow {
    fn len(&self) -> usize {
        self.mapping.len()
    }

    fn read32(&self, offset: usize) -> Result<u32, PciError> {
        check_access(offset, self.len())?;
        Ok(unsafe { (self.mapping.as_ptr().add(offset) as *const u32).read_volatile() })
    }

    fn write32(&self, offset: usize, value: u32) -> Result<(), PciError> {
        check_access(offset, self.len())?;
        unsafe { (self.mapping.as_ptr().add(offset) as *mut u32).write_volatile(value) };
        Ok(())
    }
}

/// Host memory standing in for a BAR.
///
/// Unwritten registers read as zero. Every write is recorded in order so the exact register
/// sequence issued by the driver can be inspected, and individual offsets can be made to
/// fail to emulate a broken link.
pub struct MemoryWindow {
    len: usize,
    regs: Mutex<BTreeMap<usize, u32>>,
    writes: Mutex<Vec<(usize, u32)>>,
    failing: Mutex<HashSet<usize>>,
    reads: AtomicUsize,
}

impl MemoryWindow {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            regs: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            reads: AtomicUsize::new(0),
        }
    }

    /// Set a register without recording it as a driver write.
    pub fn poke(&self, offset: usize, value: u32) {
        if let Ok(mut regs) = self.regs.lock() {
            regs.insert(offset, value);
        }
    }

    pub fn peek(&self, offset: usize) -> u32 {
        self.regs
            .lock()
            .map(|regs| regs.get(&offset).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn clear_writes(&self) {
        if let Ok(mut writes) = self.writes.lock() {
            writes.clear();
        }
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn fail_at(&self, offset: usize) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(offset);
        }
    }

    fn is_failing(&self, offset: usize) -> bool {
        self.failing
            .lock()
            .map(|failing| failing.contains(&offset))
            .unwrap_or(false)
    }
}

impl RegisterWindow for MemoryWindow {
    fn len(&self) -> usize {
        self.len
    }

    fn read32(&self, offset: usize) -> Result<u32, PciError> {
        check_access(offset, self.len)?;
        if self.is_failing(offset) {
            return Err(PciError::OutOfRange {
                offset,
                len: self.len,
            });
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.peek(offset))
    }

    fn write32(&self, offset: usize, value: u32) -> Result<(), PciError> {
        check_access(offset, self.len)?;
        if self.is_failing(offset) {
            return Err(PciError::OutOfRange {
                offset,
                len: self.len,
            });
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((offset, value));
        }
        self.poke(offset, value);
        Ok(())
    }
}
