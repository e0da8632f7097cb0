//! System-wide constants and machine-specific values.

/// The simulated machine has a single core; TLB shootdown is never needed.
pub const MAX_CORES: usize = 1;

pub mod errno;
pub mod memory;
pub mod tlb;
