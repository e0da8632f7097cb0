//! Boot Frame Allocator
//!
//! - Provides a method to allocate memory before the coremap is set up
//! - Steals contiguous pages straight out of RAM and never reclaims them

use alloc::sync::Arc;

use crate::{devices::ram::Ram, memory::addr::PhysAddr};

/// Boot frame allocator, the only allocator usable before `bootstrap`
///
/// * `ram`: the machine's RAM, which hands out the pages
/// * `stolen_frames`: the number of frames handed out so far
pub struct BootFrameAllocator {
    ram: Arc<Ram>,
    stolen_frames: usize,
}

impl BootFrameAllocator {
    pub fn new(ram: Arc<Ram>) -> Self {
        BootFrameAllocator {
            ram,
            stolen_frames: 0,
        }
    }

    /// Allocate `npages` contiguous frames
    ///
    /// # Returns
    /// Either the base address of the run or None (if RAM is exhausted)
    pub fn allocate(&mut self, npages: usize) -> Option<PhysAddr> {
        let paddr = self.ram.steal_mem(npages)?;
        self.stolen_frames += npages;
        Some(paddr)
    }

    /// Frames stolen before the coremap took over; they stay in use forever.
    pub fn stolen_frames(&self) -> usize {
        self.stolen_frames
    }

    /// Exists so both allocator phases share one interface, even though
    /// stolen memory can never be given back
    pub fn free(&mut self, paddr: PhysAddr) {
        panic!(
            "Cannot free {} before the coremap is bootstrapped",
            paddr
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::memory::PAGE_SIZE;

    #[test]
    fn test_steals_consecutive_runs() {
        let ram = Arc::new(Ram::new(32 * PAGE_SIZE, 4 * PAGE_SIZE));
        let mut boot = BootFrameAllocator::new(ram);
        assert_eq!(boot.allocate(2), Some(PhysAddr::new(4 * PAGE_SIZE)));
        assert_eq!(boot.allocate(1), Some(PhysAddr::new(6 * PAGE_SIZE)));
        assert_eq!(boot.stolen_frames(), 3);
    }

    #[test]
    #[should_panic(expected = "before the coremap")]
    fn test_free_is_fatal() {
        let ram = Arc::new(Ram::new(8 * PAGE_SIZE, 0));
        let mut boot = BootFrameAllocator::new(ram);
        let paddr = boot.allocate(1).unwrap();
        boot.free(paddr);
    }
}
