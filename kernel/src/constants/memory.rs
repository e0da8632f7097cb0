pub const PAGE_SIZE: u32 = 4096;
pub const FRAME_SIZE: usize = 4096;

/// Mask selecting the page number bits of an address.
pub const PAGE_FRAME: u32 = 0xffff_f000;

/// Start of the direct-mapped, unmapped kernel segment.
pub const MIPS_KSEG0: u32 = 0x8000_0000;

/// User stacks grow down from the bottom of kseg0.
pub const USERSTACK: u32 = MIPS_KSEG0;
/// Every address space has 48 KiB of stack.
pub const STACK_PAGES: usize = 12;

/// Only two regions besides the stack can be defined.
pub const MAX_SEGMENTS: usize = 2;

/// On-machine footprint of one coremap entry: a 32-bit frame base address
/// and a 32-bit run length.
pub const COREMAP_ENTRY_SIZE: usize = 8;

/// Largest argument block `define_stack` will copy out.
pub const ARG_MAX: usize = 64 * 1024;

// Simulator defaults
pub const DEFAULT_RAM_SIZE: u32 = 1024 * 1024; // 1 MB
pub const DEFAULT_KERNEL_END: u32 = 0x0004_0000; // kernel image occupies the first 256 KB
