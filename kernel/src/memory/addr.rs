//! 32-bit physical and virtual addresses of the simulated MIPS machine.

use core::fmt;

use crate::constants::memory::{MIPS_KSEG0, PAGE_FRAME, PAGE_SIZE};

/// A physical memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(u32);

/// A virtual memory address, user (kuseg) or kernel (kseg0).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u32);

impl PhysAddr {
    pub const fn new(addr: u32) -> Self {
        PhysAddr(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Rounds down to the start of the enclosing page.
    pub const fn align_down(self) -> Self {
        PhysAddr(self.0 & PAGE_FRAME)
    }

    pub const fn page_offset(self) -> u32 {
        self.0 & !PAGE_FRAME
    }

    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// The kseg0 address through which the kernel reaches this byte.
    pub const fn to_kvaddr(self) -> VirtAddr {
        VirtAddr(self.0 + MIPS_KSEG0)
    }

    pub const fn offset(self, bytes: u32) -> Self {
        PhysAddr(self.0 + bytes)
    }
}

impl VirtAddr {
    pub const fn new(addr: u32) -> Self {
        VirtAddr(addr)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Rounds down to the start of the enclosing page.
    pub const fn align_down(self) -> Self {
        VirtAddr(self.0 & PAGE_FRAME)
    }

    pub const fn page_offset(self) -> u32 {
        self.0 & !PAGE_FRAME
    }

    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    pub const fn is_kseg0(self) -> bool {
        self.0 >= MIPS_KSEG0
    }

    /// Physical address behind a kseg0 address.
    ///
    /// Panics if the address is not in kseg0.
    pub fn kseg0_to_phys(self) -> PhysAddr {
        assert!(self.is_kseg0(), "{} is not a kseg0 address", self);
        PhysAddr(self.0 - MIPS_KSEG0)
    }

    pub const fn offset(self, bytes: u32) -> Self {
        VirtAddr(self.0 + bytes)
    }
}

/// A page-sized, page-aligned frame of physical memory.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysFrame {
    start: PhysAddr,
}

impl PhysFrame {
    pub const fn containing_address(addr: PhysAddr) -> Self {
        PhysFrame {
            start: addr.align_down(),
        }
    }

    pub const fn start_address(self) -> PhysAddr {
        self.start
    }

    /// The `n`th frame after this one.
    pub const fn step(self, n: u32) -> Self {
        PhysFrame {
            start: PhysAddr(self.start.0 + n * PAGE_SIZE),
        }
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl fmt::Debug for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysFrame[4KiB]({:#x})", self.start.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_down_is_idempotent() {
        for raw in [0u32, 1, 0xfff, 0x1000, 0x1001, 0x7fff_ffff, 0xdead_beef] {
            let once = VirtAddr::new(raw).align_down();
            assert_eq!(once.align_down(), once);
            assert!(once.is_page_aligned());
            assert_eq!(once.as_u32() + VirtAddr::new(raw).page_offset(), raw);
        }
    }

    #[test]
    fn test_kseg0_conversion() {
        let paddr = PhysAddr::new(0x4_2000);
        let kvaddr = paddr.to_kvaddr();
        assert_eq!(kvaddr, VirtAddr::new(0x8004_2000));
        assert!(kvaddr.is_kseg0());
        assert_eq!(kvaddr.kseg0_to_phys(), paddr);
    }

    #[test]
    #[should_panic]
    fn test_user_address_is_not_kseg0() {
        VirtAddr::new(0x0040_0000).kseg0_to_phys();
    }

    #[test]
    fn test_frame_containing_address() {
        let frame = PhysFrame::containing_address(PhysAddr::new(0x5123));
        assert_eq!(frame.start_address(), PhysAddr::new(0x5000));
        assert_eq!(frame.step(2).start_address(), PhysAddr::new(0x7000));
    }
}
