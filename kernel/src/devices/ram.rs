//! Physical RAM of the simulated machine.
//!
//! - Byte-addressable backing store for every physical address below `ram_size`
//! - Hands out pages above the kernel image before the coremap exists
//! - Any access outside RAM is a bus error and halts the machine

use alloc::{vec, vec::Vec};
use log::trace;
use spin::Mutex;

use crate::{
    constants::memory::{FRAME_SIZE, PAGE_SIZE},
    memory::addr::PhysAddr,
};

/// Simulated physical memory.
pub struct Ram {
    size: u32,
    inner: Mutex<RamState>,
}

struct RamState {
    bytes: Vec<u8>,
    // next page `steal_mem` hands out
    first_paddr: u32,
    last_paddr: u32,
}

impl Ram {
    /// Creates `size` bytes of zeroed RAM with `[0, kernel_end)` holding the kernel image.
    pub fn new(size: u32, kernel_end: u32) -> Self {
        assert!(size % PAGE_SIZE == 0, "RAM size {:#x} is not page aligned", size);
        assert!(kernel_end <= size, "kernel image does not fit in RAM");

        let first_paddr = kernel_end.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        Ram {
            size,
            inner: Mutex::new(RamState {
                bytes: vec![0; size as usize],
                first_paddr,
                last_paddr: size,
            }),
        }
    }

    /// Installed RAM in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Steals `npages` contiguous pages of never-before-used RAM.
    ///
    /// # Returns
    /// The physical address of the first stolen page, or `None` once RAM is
    /// exhausted or handed over through [`Ram::getsize`]. Stolen pages are
    /// never given back.
    pub fn steal_mem(&self, npages: usize) -> Option<PhysAddr> {
        let mut state = self.inner.lock();
        let bytes = u32::try_from(npages).ok()?.checked_mul(PAGE_SIZE)?;
        if state.first_paddr.checked_add(bytes)? > state.last_paddr {
            return None;
        }
        let paddr = state.first_paddr;
        state.first_paddr += bytes;
        trace!("ram: stole {} pages at {:#x}", npages, paddr);
        Some(PhysAddr::new(paddr))
    }

    /// Hands the rest of RAM over to the caller.
    ///
    /// # Returns
    /// `(lo, hi)`, the page-aligned extent of RAM not yet stolen. After this
    /// call `steal_mem` always fails.
    pub fn getsize(&self) -> (PhysAddr, PhysAddr) {
        let mut state = self.inner.lock();
        let lo = state.first_paddr;
        let hi = state.last_paddr;
        state.first_paddr = state.last_paddr;
        (PhysAddr::new(lo), PhysAddr::new(hi))
    }

    /// Fills the frame starting at `paddr` with zeroes.
    pub fn zero_frame(&self, paddr: PhysAddr) {
        let mut state = self.inner.lock();
        let range = self.frame_range(paddr);
        state.bytes[range].fill(0);
    }

    /// Copies the whole frame at `src` over the frame at `dst`.
    pub fn copy_frame(&self, dst: PhysAddr, src: PhysAddr) {
        let mut state = self.inner.lock();
        let dst_range = self.frame_range(dst);
        let src_range = self.frame_range(src);
        state.bytes.copy_within(src_range, dst_range.start);
    }

    /// Reads `buf.len()` bytes starting at `paddr`.
    pub fn read(&self, paddr: PhysAddr, buf: &mut [u8]) {
        let state = self.inner.lock();
        let range = self.range(paddr, buf.len());
        buf.copy_from_slice(&state.bytes[range]);
    }

    /// Writes `data` starting at `paddr`.
    pub fn write(&self, paddr: PhysAddr, data: &[u8]) {
        let mut state = self.inner.lock();
        let range = self.range(paddr, data.len());
        state.bytes[range].copy_from_slice(data);
    }

    fn frame_range(&self, paddr: PhysAddr) -> core::ops::Range<usize> {
        assert!(
            paddr.is_page_aligned(),
            "bus error: frame address {} is not page aligned",
            paddr
        );
        self.range(paddr, FRAME_SIZE)
    }

    fn range(&self, paddr: PhysAddr, len: usize) -> core::ops::Range<usize> {
        let start = paddr.as_u32() as usize;
        let end = start + len;
        assert!(
            end <= self.size as usize,
            "bus error: access to {}..{:#x} beyond RAM",
            paddr,
            end
        );
        start..end
    }
}
