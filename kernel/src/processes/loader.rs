use alloc::sync::Arc;
use log::{debug, warn};

use crate::{
    devices::tlb::Tlb,
    memory::{
        addr::VirtAddr,
        address_space::{self, AddressSpace, RegionFlags},
        error::VmError,
        frame_allocator::FrameAllocator,
    },
};

/// One loadable piece of a program image.
#[derive(Debug, Clone, Copy)]
pub struct LoadSegment<'a> {
    pub vaddr: VirtAddr,
    /// Size in memory; anything past `data` stays zero.
    pub mem_size: usize,
    pub data: &'a [u8],
    pub flags: RegionFlags,
}

/// Builds the address space for a program image and sets up its arguments.
///
/// # Returns
/// The new address space, already active in `tlb`, and the initial stack
/// pointer. On failure everything allocated so far is released.
pub fn load_program(
    frames: &Arc<FrameAllocator>,
    tlb: &Tlb,
    segments: &[LoadSegment],
    args: &[&str],
) -> Result<(AddressSpace, VirtAddr), VmError> {
    if let Some(bad) = segments.iter().find(|s| s.data.len() > s.mem_size) {
        warn!(
            "loader: segment at {} has {} bytes for {} in memory",
            bad.vaddr,
            bad.data.len(),
            bad.mem_size
        );
        return Err(VmError::MalformedImage(bad.vaddr));
    }

    let mut space = AddressSpace::new(frames.clone());
    for segment in segments {
        space.define_region(segment.vaddr, segment.mem_size, segment.flags)?;
    }
    space.prepare_load()?;
    address_space::activate(tlb, Some(&space));

    for segment in segments {
        space.copyout(segment.vaddr, segment.data)?;
        debug!(
            "loader: {} bytes at {} ({} in memory)",
            segment.data.len(),
            segment.vaddr,
            segment.mem_size
        );
    }
    space.complete_load(tlb);

    let stackptr = space.define_stack(args)?;
    Ok((space, stackptr))
}
