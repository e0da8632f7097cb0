use alloc::sync::Arc;
use log::{error, info, warn};
use spin::Mutex;

use crate::{
    devices::ram::Ram,
    memory::{
        addr::{PhysAddr, VirtAddr},
        boot_frame_allocator::BootFrameAllocator,
        coremap::{Coremap, FrameState},
        error::VmError,
    },
};

/// The two phases physical memory management goes through
pub enum GlobalFrameAllocator {
    Boot(BootFrameAllocator),
    Coremap(Coremap),
}

impl GlobalFrameAllocator {
    fn allocate(&mut self, npages: usize) -> Option<PhysAddr> {
        match self {
            GlobalFrameAllocator::Boot(ref mut boot_alloc) => boot_alloc.allocate(npages),
            GlobalFrameAllocator::Coremap(ref mut coremap) => coremap.allocate(npages),
        }
    }

    fn free(&mut self, paddr: PhysAddr) {
        match self {
            GlobalFrameAllocator::Boot(ref mut boot_alloc) => boot_alloc.free(paddr),
            GlobalFrameAllocator::Coremap(ref mut coremap) => coremap.free(paddr),
        }
    }
}

/// Owner of all physical memory above the kernel image.
///
/// Every allocation and free is serialized by one lock, so allocator
/// operations from different threads never interleave. Construct it once at
/// boot and hand an `Arc` to everything that needs frames.
pub struct FrameAllocator {
    ram: Arc<Ram>,
    inner: Mutex<GlobalFrameAllocator>,
}

impl FrameAllocator {
    /// Starts out stealing memory; call [`FrameAllocator::bootstrap`] to
    /// switch to the coremap.
    pub fn new(ram: Arc<Ram>) -> Self {
        FrameAllocator {
            inner: Mutex::new(GlobalFrameAllocator::Boot(BootFrameAllocator::new(
                ram.clone(),
            ))),
            ram,
        }
    }

    /// Switches from the boot allocator to the coremap, which takes over
    /// every frame not yet stolen. Later calls leave the coremap untouched.
    pub fn bootstrap(&self) {
        let mut alloc = self.inner.lock();
        let stolen = match *alloc {
            GlobalFrameAllocator::Boot(ref boot_alloc) => boot_alloc.stolen_frames(),
            GlobalFrameAllocator::Coremap(_) => {
                warn!("coremap: already bootstrapped");
                return;
            }
        };
        let (lo, hi) = self.ram.getsize();
        *alloc = GlobalFrameAllocator::Coremap(Coremap::new(lo, hi));
        info!("coremap: took over from boot allocator after {} stolen frames", stolen);
    }

    pub fn is_bootstrapped(&self) -> bool {
        matches!(*self.inner.lock(), GlobalFrameAllocator::Coremap(_))
    }

    /// Allocates `npages` physically contiguous frames. Contents are not zeroed.
    ///
    /// # Returns
    /// The physical address of the first frame, or `OutOfMemory` if no free
    /// run is long enough
    pub fn try_alloc_frames(&self, npages: usize) -> Result<PhysAddr, VmError> {
        assert!(npages > 0, "cannot allocate an empty run of frames");
        self.inner
            .lock()
            .allocate(npages)
            .ok_or(VmError::OutOfMemory)
    }

    /// Allocates `npages` physically contiguous frames for the kernel.
    ///
    /// # Panics
    /// There is no swapping, so running out of memory halts the kernel.
    pub fn alloc_frames(&self, npages: usize) -> PhysAddr {
        match self.try_alloc_frames(npages) {
            Ok(paddr) => paddr,
            Err(_) => {
                error!("coremap: no run of {} free frames", npages);
                panic!("out of memory");
            }
        }
    }

    /// Returns the run starting at `paddr` to the free pool.
    ///
    /// # Panics
    /// If `paddr` is not a base address returned by an allocation.
    pub fn free_frames(&self, paddr: PhysAddr) {
        self.inner.lock().free(paddr);
    }

    /// Allocates kernel pages, returning their kseg0 address.
    pub fn alloc_kpages(&self, npages: usize) -> VirtAddr {
        self.alloc_frames(npages).to_kvaddr()
    }

    /// Frees kernel pages returned by [`FrameAllocator::alloc_kpages`].
    pub fn free_kpages(&self, kvaddr: VirtAddr) {
        self.free_frames(kvaddr.kseg0_to_phys());
    }

    pub fn ram(&self) -> &Ram {
        &self.ram
    }

    pub fn free_frame_count(&self) -> usize {
        self.with_coremap(Coremap::free_frames)
    }

    pub fn total_frames(&self) -> usize {
        self.with_coremap(Coremap::total_frames)
    }

    pub fn reserved_frames(&self) -> usize {
        self.with_coremap(Coremap::reserved_frames)
    }

    pub fn frame_state(&self, paddr: PhysAddr) -> FrameState {
        self.with_coremap(|coremap| coremap.state_of(paddr))
    }

    /// Runs `f` on the coremap with the allocator lock held.
    ///
    /// # Panics
    /// If the allocator has not been bootstrapped.
    pub fn with_coremap<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Coremap) -> R,
    {
        let guard = self.inner.lock();
        match &*guard {
            GlobalFrameAllocator::Coremap(coremap) => f(coremap),
            GlobalFrameAllocator::Boot(_) => panic!("Allocator is not bootstrapped"),
        }
    }
}
