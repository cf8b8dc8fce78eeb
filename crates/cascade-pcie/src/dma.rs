// SPDX-FileCopyrightText: © 2023 Cascade driver contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::{
    atomic::{fence, AtomicU32, AtomicUsize, Ordering},
    Arc,
};

use crate::error::PciError;

/// Size of the coherent buffer shared with the firmware.
pub const DMA_COHERENT_BUFFER_SIZE: usize = 1 << 20;

/// Memory shared with the device through DMA.
///
/// Accesses are only guaranteed to be observed by the other side once the matching sync call
/// has been made, the same contract as a streaming DMA mapping.
pub trait DmaRegion: Send + Sync {
    fn len(&self) -> usize;

    fn read32(&self, offset: usize) -> Result<u32, PciError>;
    fn write32(&self, offset: usize, value: u32) -> Result<(), PciError>;

    /// Make host writes in `[offset, offset + len)` visible to the device.
    fn sync_for_device(&self, offset: usize, len: usize);
    /// Make device writes in `[offset, offset + len)` visible to the host.
    fn sync_for_cpu(&self, offset: usize, len: usize);

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

/// The coherent buffer the kernel driver exports through mmap of the device node.
pub struct MappedDma {
    mapping: memmap2::MmapMut,
}

impl MappedDma {
    pub fn map(file: &std::fs::File, size: usize) -> std::io::Result<Self> {
        let mapping = unsafe { memmap2::MmapOptions::new().len(size).map_mut(file)? };
        Ok(Self { mapping })
    }
}

impl DmaRegion for MappedDma {
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

    fn sync_for_device(&self, _offset: usize, _len: usize) {
        fence(Ordering::SeqCst);
    }

    fn sync_for_cpu(&self, _offset: usize, _len: usize) {
        fence(Ordering::SeqCst);
    }
}

/// Host memory shared between the driver and a thread playing the firmware.
#[derive(Clone)]
pub struct HostDma {
    words: Arc<Vec<AtomicU32>>,
    device_syncs: Arc<AtomicUsize>,
}

impl HostDma {
    pub fn new(size: usize) -> Self {
        let words = (0..size / std::mem::size_of::<u32>())
            .map(|_| AtomicU32::new(0))
            .collect();
        Self {
            words: Arc::new(words),
            device_syncs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of times the driver handed memory back to the device.
    pub fn device_syncs(&self) -> usize {
        self.device_syncs.load(Ordering::SeqCst)
    }

    pub fn load(&self, offset: usize) -> u32 {
        self.words
            .get(offset / 4)
            .map(|w| w.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn store(&self, offset: usize, value: u32) {
        if let Some(word) = self.words.get(offset / 4) {
            word.store(value, Ordering::SeqCst);
        }
    }
}

impl DmaRegion for HostDma {
    fn len(&self) -> usize {
        self.words.len() * std::mem::size_of::<u32>()
    }

    fn read32(&self, offset: usize) -> Result<u32, PciError> {
        check_access(offset, self.len())?;
        Ok(self.load(offset))
    }

    fn write32(&self, offset: usize, value: u32) -> Result<(), PciError> {
        check_access(offset, self.len())?;
        self.store(offset, value);
        Ok(())
    }

    fn sync_for_device(&self, _offset: usize, _len: usize) {
        fence(Ordering::SeqCst);
        self.device_syncs.fetch_add(1, Ordering::SeqCst);
    }

    fn sync_for_cpu(&self, _offset: usize, _len: usize) {
        fence(Ordering::SeqCst);
    }
}
