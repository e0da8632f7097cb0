//! Physical and virtual memory management for a single-core MIPS machine
//! with a software-managed TLB.
//!
//! Physical RAM is handed out in frames by a coremap, each process gets an
//! address space of two segments and a fixed stack backed frame by frame,
//! and TLB misses are refilled by the fault handler.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(feature = "strict", deny(warnings))]
extern crate alloc;

pub mod constants;
pub mod devices;
pub mod logging;
pub mod memory;
pub mod processes;

pub use devices::serial;
