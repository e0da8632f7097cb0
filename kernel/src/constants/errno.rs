//! Kernel error numbers handed back to the syscall and trap layers.

pub const EUNIMP: i32 = 2;
pub const ENOMEM: i32 = 3;
pub const EFAULT: i32 = 6;
pub const EINVAL: i32 = 8;
pub const E2BIG: i32 = 14;

/// Exception code for a store through a TLB entry without the dirty bit.
pub const EX_MOD: i32 = 1;
