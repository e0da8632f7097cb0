//! MIPS R3000 TLB layout.

/// Number of entries in the hardware TLB.
pub const NUM_TLB: usize = 64;

/// EntryHi: virtual page number.
pub const TLBHI_VPAGE: u32 = 0xffff_f000;
/// EntryLo: physical page number.
pub const TLBLO_PPAGE: u32 = 0xffff_f000;

/// Fault codes as delivered by the trap dispatcher.
pub const VM_FAULT_READ: u32 = 0;
pub const VM_FAULT_WRITE: u32 = 1;
pub const VM_FAULT_READONLY: u32 = 2;

/// How many times one access may fault before the kernel gives up.
pub const MAX_FAULT_RETRIES: usize = 3;

/// Default seed for the random-replacement register.
pub const DEFAULT_TLB_SEED: u64 = 0x1332;

/// EntryHi value for an invalidated slot. Each slot gets a distinct
/// kernel-segment page so no two entries ever match the same address.
pub const fn tlbhi_invalid(slot: usize) -> u32 {
    ((0x80000 + slot as u32) << 12) & TLBHI_VPAGE
}

/// EntryLo value for an invalidated slot.
pub const fn tlblo_invalid() -> u32 {
    0
}
