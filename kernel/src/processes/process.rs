use alloc::string::{String, ToString};
use core::sync::atomic::{AtomicU32, Ordering};
use log::debug;

use crate::{
    devices::tlb::Tlb,
    memory::{
        address_space::{self, AddressSpace},
        error::VmError,
    },
};

// process counter must be thread-safe
static NEXT_PID: AtomicU32 = AtomicU32::new(1);

/// The part of a process the memory manager cares about.
pub struct Process {
    pid: u32,
    name: String,
    address_space: Option<AddressSpace>,
}

impl Process {
    /// A process with no address space yet, like a kernel thread.
    pub fn new(name: &str) -> Self {
        Process {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            address_space: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address_space(&self) -> Option<&AddressSpace> {
        self.address_space.as_ref()
    }

    pub fn address_space_mut(&mut self) -> Option<&mut AddressSpace> {
        self.address_space.as_mut()
    }

    /// Installs `space` and hands back the one it replaces.
    pub fn set_address_space(&mut self, space: Option<AddressSpace>) -> Option<AddressSpace> {
        core::mem::replace(&mut self.address_space, space)
    }

    /// Creates a child whose address space is a full copy of this one.
    pub fn fork(&self, name: &str) -> Result<Process, VmError> {
        let address_space = self.address_space.as_ref().map(AddressSpace::copy).transpose()?;
        let child = Process {
            pid: NEXT_PID.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            address_space,
        };
        debug!("proc: {} forked {} as pid {}", self.pid, child.name, child.pid);
        Ok(child)
    }

    /// Tears down the address space. The space is detached before it is
    /// destroyed so nothing can activate it halfway through.
    pub fn exit(&mut self, tlb: &Tlb) {
        address_space::deactivate(tlb);
        if let Some(space) = self.set_address_space(None) {
            space.destroy();
        }
        debug!("proc: {} exited", self.pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::memory::PAGE_SIZE,
        devices::ram::Ram,
        memory::{
            addr::VirtAddr, address_space::RegionFlags, frame_allocator::FrameAllocator,
        },
    };
    use alloc::sync::Arc;

    fn allocator() -> Arc<FrameAllocator> {
        let ram = Arc::new(Ram::new(96 * PAGE_SIZE, 0));
        let frames = FrameAllocator::new(ram);
        frames.bootstrap();
        Arc::new(frames)
    }

    fn with_space(frames: &Arc<FrameAllocator>) -> Process {
        let mut space = AddressSpace::new(frames.clone());
        space
            .define_region(VirtAddr::new(0x40_0000), 100, RegionFlags::READ)
            .unwrap();
        space.prepare_load().unwrap();
        let mut process = Process::new("parent");
        assert!(process.set_address_space(Some(space)).is_none());
        process
    }

    #[test]
    fn test_pids_are_unique() {
        let a = Process::new("a");
        let b = Process::new("b");
        assert_ne!(a.pid(), b.pid());
        assert_eq!(b.name(), "b");
    }

    #[test]
    fn test_fork_copies_memory() {
        let frames = allocator();
        let parent = with_space(&frames);
        let space = parent.address_space().unwrap();
        space.copyout(VirtAddr::new(0x40_0020), b"inherited").unwrap();

        let child = parent.fork("child").unwrap();
        assert_ne!(child.pid(), parent.pid());
        let mut buf = [0u8; 9];
        child
            .address_space()
            .unwrap()
            .copyin(VirtAddr::new(0x40_0020), &mut buf)
            .unwrap();
        assert_eq!(&buf, b"inherited");
    }

    #[test]
    fn test_fork_without_memory_fails_cleanly() {
        // 96 frames, 1 reserved, parent takes 13, child would need 13 more
        let frames = allocator();
        let parent = with_space(&frames);
        let hog = frames.alloc_frames(frames.free_frame_count() - 5);
        let free = frames.free_frame_count();

        assert!(matches!(parent.fork("child"), Err(VmError::OutOfMemory)));
        assert_eq!(frames.free_frame_count(), free);
        frames.free_frames(hog);
    }

    #[test]
    fn test_exit_releases_frames() {
        let frames = allocator();
        let free = frames.free_frame_count();
        let tlb = Tlb::new(1);
        let mut process = with_space(&frames);
        assert!(frames.free_frame_count() < free);

        process.exit(&tlb);
        assert!(process.address_space().is_none());
        assert_eq!(frames.free_frame_count(), free);
    }
}
