//! Physical and virtual memory management.
//!
//! - `frame_allocator`: the boot allocator and the coremap behind one lock
//! - `address_space`: per-process segments, stack and their frames
//! - `fault`: TLB refill on faults

pub mod addr;
pub mod address_space;
pub mod boot_frame_allocator;
pub mod coremap;
pub mod error;
pub mod fault;
pub mod frame_allocator;
pub mod tlb;

use alloc::sync::Arc;

use crate::devices::Machine;
use frame_allocator::FrameAllocator;

pub use error::VmError;

/// Brings up physical memory management on `machine`: the coremap takes
/// over every page of RAM not already stolen during early boot.
pub fn init(machine: &Machine) -> Arc<FrameAllocator> {
    let frames = FrameAllocator::new(machine.ram.clone());
    frames.bootstrap();
    Arc::new(frames)
}

/// Like [`init`], but lets early boot code steal pages first.
pub fn init_with<F>(machine: &Machine, early_boot: F) -> Arc<FrameAllocator>
where
    F: FnOnce(&FrameAllocator),
{
    let frames = FrameAllocator::new(machine.ram.clone());
    early_boot(&frames);
    frames.bootstrap();
    Arc::new(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::memory::{DEFAULT_KERNEL_END, DEFAULT_RAM_SIZE, PAGE_SIZE},
        devices::MachineConfig,
    };

    #[test]
    fn test_init_covers_ram_above_kernel() {
        let machine = Machine::new(MachineConfig::default());
        let frames = init(&machine);
        let expected = ((DEFAULT_RAM_SIZE - DEFAULT_KERNEL_END) / PAGE_SIZE) as usize;
        assert_eq!(frames.total_frames(), expected);
        assert_eq!(
            frames.free_frame_count(),
            expected - frames.reserved_frames()
        );
    }

    #[test]
    fn test_early_boot_steals_before_coremap() {
        let machine = Machine::new(MachineConfig::default());
        let mut stolen = None;
        let frames = init_with(&machine, |boot| stolen = Some(boot.alloc_frames(4)));
        let expected = ((DEFAULT_RAM_SIZE - DEFAULT_KERNEL_END) / PAGE_SIZE) as usize - 4;
        assert_eq!(stolen, Some(crate::memory::addr::PhysAddr::new(DEFAULT_KERNEL_END)));
        assert_eq!(frames.total_frames(), expected);
    }
}
