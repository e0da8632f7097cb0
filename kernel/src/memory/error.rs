use thiserror::Error;

use crate::{
    constants::errno::{E2BIG, EFAULT, EINVAL, ENOMEM, EUNIMP, EX_MOD},
    memory::addr::VirtAddr,
};

/// Recoverable failures of the memory manager.
///
/// Broken invariants are not errors; they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("too many regions")]
    TooManyRegions,
    #[error("unknown fault type {0}")]
    InvalidFaultType(u32),
    #[error("fault at {0} with no address space")]
    NoAddressSpace(VirtAddr),
    #[error("access to unmapped address {0}")]
    Unmapped(VirtAddr),
    #[error("write to read-only page at {0}")]
    ReadOnly(VirtAddr),
    #[error("bad user address {0}")]
    BadUserAddress(VirtAddr),
    #[error("argument list too long")]
    ArgumentListTooLong,
    #[error("image segment at {0} holds more data than its size in memory")]
    MalformedImage(VirtAddr),
}

impl VmError {
    /// The code handed back to the syscall or trap layer.
    pub const fn errno(self) -> i32 {
        match self {
            VmError::OutOfMemory => ENOMEM,
            VmError::TooManyRegions => EUNIMP,
            VmError::InvalidFaultType(_) | VmError::MalformedImage(_) => EINVAL,
            VmError::NoAddressSpace(_) | VmError::Unmapped(_) | VmError::BadUserAddress(_) => {
                EFAULT
            }
            VmError::ReadOnly(_) => EX_MOD,
            VmError::ArgumentListTooLong => E2BIG,
        }
    }
}
