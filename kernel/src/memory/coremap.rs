//! The coremap: one descriptor per physical frame above the kernel.
//!
//! Allocation is first fit over the descriptor table and hands out runs of
//! contiguous frames. The table itself notionally lives in the first frames
//! of the managed extent, so those frames are reserved for good at creation.

use alloc::vec::Vec;
use log::{info, trace};

use crate::{
    constants::memory::{COREMAP_ENTRY_SIZE, FRAME_SIZE, PAGE_SIZE},
    memory::addr::{PhysAddr, PhysFrame},
};

/// Allocation state of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Free,
    /// First frame of an allocation spanning this many frames.
    Head(usize),
    /// Any later frame of an allocation.
    Continuation,
}

impl FrameState {
    pub fn is_free(self) -> bool {
        self == FrameState::Free
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FrameDescriptor {
    base: PhysAddr,
    state: FrameState,
}

impl FrameDescriptor {
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    pub fn state(&self) -> FrameState {
        self.state
    }
}

pub struct Coremap {
    base: PhysAddr,
    descriptors: Vec<FrameDescriptor>,
    reserved_frames: usize,
    free_frames: usize,
}

impl Coremap {
    /// Takes over the RAM extent `[lo, hi)`.
    pub fn new(lo: PhysAddr, hi: PhysAddr) -> Self {
        assert!(lo.is_page_aligned(), "coremap base {} is not page aligned", lo);
        assert!(lo <= hi, "empty RAM extent {}..{}", lo, hi);

        let total_frames = ((hi.as_u32() - lo.as_u32()) / PAGE_SIZE) as usize;
        let reserved_frames = Self::table_frames(total_frames).min(total_frames);

        let first = PhysFrame::containing_address(lo);
        let descriptors = (0..total_frames)
            .map(|i| FrameDescriptor {
                base: first.step(i as u32).start_address(),
                state: if i < reserved_frames {
                    FrameState::Head(1)
                } else {
                    FrameState::Free
                },
            })
            .collect();

        info!(
            "coremap: {} frames at {}, {} hold the table",
            total_frames, lo, reserved_frames
        );

        Coremap {
            base: lo,
            descriptors,
            reserved_frames,
            free_frames: total_frames - reserved_frames,
        }
    }

    /// Frames needed to hold the descriptors of `total_frames` frames.
    pub fn table_frames(total_frames: usize) -> usize {
        (total_frames * COREMAP_ENTRY_SIZE).div_ceil(FRAME_SIZE)
    }

    /// Marks the first run of `npages` free frames as allocated.
    ///
    /// # Returns
    /// The base address of the run, or None if no run that long is free
    pub fn allocate(&mut self, npages: usize) -> Option<PhysAddr> {
        assert!(npages > 0, "cannot allocate an empty run of frames");

        let start = self.find_free_run(npages)?;
        self.descriptors[start].state = FrameState::Head(npages);
        for desc in &mut self.descriptors[start + 1..start + npages] {
            desc.state = FrameState::Continuation;
        }
        self.free_frames -= npages;

        let paddr = self.descriptors[start].base;
        trace!("coremap: allocated {} frames at {}", npages, paddr);
        Some(paddr)
    }

    /// Releases the run starting at `paddr`.
    ///
    /// # Panics
    /// If `paddr` is not the base address of a live allocation.
    pub fn free(&mut self, paddr: PhysAddr) {
        let index = self.index_of(paddr);
        assert!(
            index >= self.reserved_frames,
            "freeing {}, which holds the coremap",
            paddr
        );

        let npages = match self.descriptors[index].state {
            FrameState::Head(npages) => npages,
            state => panic!("freeing {}, which is {:?} rather than a run head", paddr, state),
        };
        for desc in &mut self.descriptors[index + 1..index + npages] {
            assert_eq!(
                desc.state,
                FrameState::Continuation,
                "coremap corrupted inside run at {}",
                paddr
            );
        }
        for desc in &mut self.descriptors[index..index + npages] {
            desc.state = FrameState::Free;
        }
        self.free_frames += npages;
        trace!("coremap: freed {} frames at {}", npages, paddr);
    }

    /// State of the frame holding `paddr`.
    pub fn state_of(&self, paddr: PhysAddr) -> FrameState {
        self.descriptors[self.index_of(paddr.align_down())].state
    }

    pub fn descriptors(&self) -> &[FrameDescriptor] {
        &self.descriptors
    }

    pub fn total_frames(&self) -> usize {
        self.descriptors.len()
    }

    pub fn reserved_frames(&self) -> usize {
        self.reserved_frames
    }

    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    fn find_free_run(&self, npages: usize) -> Option<usize> {
        let mut run_start = 0;
        let mut run_len = 0;
        for (i, desc) in self.descriptors.iter().enumerate() {
            if !desc.state.is_free() {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = i;
            }
            run_len += 1;
            if run_len == npages {
                return Some(run_start);
            }
        }
        None
    }

    fn index_of(&self, paddr: PhysAddr) -> usize {
        assert!(
            paddr >= self.base,
            "{} lies below the coremap base {}",
            paddr,
            self.base
        );
        let offset = paddr.as_u32() - self.base.as_u32();
        assert!(offset % PAGE_SIZE == 0, "{} is not a frame address", paddr);
        let index = (offset / PAGE_SIZE) as usize;
        assert!(
            index < self.descriptors.len(),
            "{} lies beyond the coremap",
            paddr
        );
        index
    }
}
