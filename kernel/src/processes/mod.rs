//! Processes as seen by the memory manager, and the program loader that
//! builds their address spaces.

pub mod loader;
pub mod process;
