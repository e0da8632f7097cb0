//! Cross-CPU TLB maintenance.
//!
//! The machine has [`MAX_CORES`] core and nothing is ever mapped in another
//! core's TLB, so a shootdown request can only come from a kernel bug.

use crate::{constants::MAX_CORES, memory::addr::VirtAddr};

/// A request to drop one page from every other core's TLB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbShootdown {
    pub target_vaddr: VirtAddr,
}

pub fn tlb_shootdown(request: &TlbShootdown) -> ! {
    panic!(
        "vm: tlb shootdown of {} requested on a {}-core machine",
        request.target_vaddr, MAX_CORES
    );
}

pub fn tlb_shootdown_all() -> ! {
    panic!("vm: tlb shootdown requested on a {}-core machine", MAX_CORES);
}
