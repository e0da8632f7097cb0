//! The simulated machine.
//!
//! This module provides the hardware the memory manager runs on:
//! - RAM with a boot-time page stealer
//! - The software-managed TLB of the single CPU
//! - A serial console for kernel output

use alloc::sync::Arc;
use log::info;

use crate::constants::{
    memory::{DEFAULT_KERNEL_END, DEFAULT_RAM_SIZE},
    tlb::DEFAULT_TLB_SEED,
};

pub mod ram;
pub mod serial;
pub mod tlb;

use ram::Ram;
use tlb::Tlb;

/// Sizing of the simulated machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    /// Installed RAM in bytes, page aligned.
    pub ram_size: u32,
    /// End of the kernel image; RAM below it is never handed out.
    pub kernel_end: u32,
    /// Seed of the TLB random-replacement register.
    pub tlb_seed: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            ram_size: DEFAULT_RAM_SIZE,
            kernel_end: DEFAULT_KERNEL_END,
            tlb_seed: DEFAULT_TLB_SEED,
        }
    }
}

/// A powered-on machine.
pub struct Machine {
    pub ram: Arc<Ram>,
    pub tlb: Tlb,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        info!(
            "machine: {}K RAM, kernel ends at {:#x}",
            config.ram_size / 1024,
            config.kernel_end
        );
        Machine {
            ram: Arc::new(Ram::new(config.ram_size, config.kernel_end)),
            tlb: Tlb::new(config.tlb_seed),
        }
    }
}
