//! Per-process address spaces.
//!
//! An address space is two loadable segments plus a fixed 48 KiB stack just
//! below [`USERSTACK`]. Every page is backed by its own physical frame from
//! the moment `prepare_load` runs; the TLB is filled lazily by the fault
//! handler. The space owns its frames and gives them back when dropped.

use alloc::{sync::Arc, vec::Vec};
use arrayvec::ArrayVec;
use bitflags::bitflags;
use log::{debug, warn};

use crate::{
    constants::memory::{ARG_MAX, MAX_SEGMENTS, PAGE_SIZE, STACK_PAGES, USERSTACK},
    devices::tlb::Tlb,
    memory::{
        addr::{PhysAddr, PhysFrame, VirtAddr},
        error::VmError,
        frame_allocator::FrameAllocator,
    },
};

bitflags! {
    /// Permissions a loader asks for when defining a region.
    ///
    /// They are recorded but not enforced: every page is mapped read-write,
    /// except the first segment once loading is complete.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
    }
}

/// Which part of an address space an address falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Segment1,
    Segment2,
    Stack,
}

/// A contiguous run of virtual pages and the frames backing them.
#[derive(Debug)]
pub struct Segment {
    vbase: VirtAddr,
    npages: usize,
    flags: RegionFlags,
    // frames[i] backs page vbase + i * PAGE_SIZE; empty until prepare_load
    frames: Vec<PhysFrame>,
}

impl Segment {
    fn new(vbase: VirtAddr, npages: usize, flags: RegionFlags) -> Self {
        Segment {
            vbase,
            npages,
            flags,
            frames: Vec::with_capacity(npages),
        }
    }

    pub fn vbase(&self) -> VirtAddr {
        self.vbase
    }

    pub fn npages(&self) -> usize {
        self.npages
    }

    pub fn flags(&self) -> RegionFlags {
        self.flags
    }

    pub fn frames(&self) -> &[PhysFrame] {
        &self.frames
    }

    pub fn is_prepared(&self) -> bool {
        self.frames.len() == self.npages
    }

    /// Half-open membership test against `[vbase, vbase + npages * PAGE_SIZE)`.
    pub fn contains(&self, vaddr: VirtAddr) -> bool {
        vaddr >= self.vbase && self.page_index(vaddr) < self.npages
    }

    // one past the last byte; regions never wrap
    fn end(&self) -> u32 {
        self.vbase.as_u32() + self.npages as u32 * PAGE_SIZE
    }

    fn page_index(&self, vaddr: VirtAddr) -> usize {
        ((vaddr.as_u32() - self.vbase.as_u32()) / PAGE_SIZE) as usize
    }

    fn frame_for(&self, vaddr: VirtAddr) -> Option<PhysFrame> {
        if !self.contains(vaddr) {
            return None;
        }
        self.frames.get(self.page_index(vaddr)).copied()
    }
}

/// Frames taken for a space that is still being prepared. Dropping the
/// reservation without committing it frees every frame in it.
struct FrameReservation<'a> {
    allocator: &'a FrameAllocator,
    frames: Vec<PhysFrame>,
}

impl<'a> FrameReservation<'a> {
    fn new(allocator: &'a FrameAllocator, capacity: usize) -> Self {
        FrameReservation {
            allocator,
            frames: Vec::with_capacity(capacity),
        }
    }

    /// Takes one zeroed frame.
    fn take_zeroed(&mut self) -> Result<(), VmError> {
        let paddr = self.allocator.try_alloc_frames(1)?;
        self.allocator.ram().zero_frame(paddr);
        self.frames.push(PhysFrame::containing_address(paddr));
        Ok(())
    }

    fn commit(mut self) -> Vec<PhysFrame> {
        core::mem::take(&mut self.frames)
    }
}

impl Drop for FrameReservation<'_> {
    fn drop(&mut self) {
        if !self.frames.is_empty() {
            debug!("as: rolling back {} frames", self.frames.len());
        }
        for frame in self.frames.drain(..) {
            self.allocator.free_frames(frame.start_address());
        }
    }
}

pub struct AddressSpace {
    allocator: Arc<FrameAllocator>,
    segments: ArrayVec<Segment, MAX_SEGMENTS>,
    stack: Segment,
    load_complete: bool,
}

impl AddressSpace {
    /// Creates an empty address space whose frames will come from `allocator`.
    pub fn new(allocator: Arc<FrameAllocator>) -> Self {
        AddressSpace {
            allocator,
            segments: ArrayVec::new(),
            stack: Segment::new(
                VirtAddr::new(USERSTACK - STACK_PAGES as u32 * PAGE_SIZE),
                STACK_PAGES,
                RegionFlags::READ | RegionFlags::WRITE,
            ),
            load_complete: false,
        }
    }

    /// Declares a region of `size` bytes at `vaddr`.
    ///
    /// The base is rounded down to a page boundary and the size grown to
    /// cover whole pages. The first call defines segment 1, the second
    /// segment 2; any further call fails with `TooManyRegions`. A region
    /// that runs into the stack or overlaps the other segment fails with
    /// `BadUserAddress`.
    pub fn define_region(
        &mut self,
        vaddr: VirtAddr,
        size: usize,
        flags: RegionFlags,
    ) -> Result<(), VmError> {
        if self.segments.is_full() {
            warn!("as: too many regions");
            return Err(VmError::TooManyRegions);
        }

        let bad_region = VmError::BadUserAddress(vaddr);
        let vbase = vaddr.align_down();
        let span = size
            .checked_add(vaddr.page_offset() as usize)
            .and_then(|span| u32::try_from(span).ok())
            .ok_or(bad_region)?;
        let npages = span.div_ceil(PAGE_SIZE);
        let vend = npages
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| vbase.as_u32().checked_add(bytes))
            .ok_or(bad_region)?;

        if vend > self.stack.vbase.as_u32() {
            warn!("as: region at {} runs into the stack", vbase);
            return Err(bad_region);
        }
        if self
            .segments
            .iter()
            .any(|other| vbase.as_u32() < other.end() && other.vbase.as_u32() < vend)
        {
            warn!("as: region at {} overlaps an existing region", vbase);
            return Err(bad_region);
        }

        let npages = npages as usize;
        self.segments.push(Segment::new(vbase, npages, flags));
        debug!("as: region at {} with {} pages, {:?}", vbase, npages, flags);
        Ok(())
    }

    /// Backs every page of both segments and the stack with a zeroed frame.
    ///
    /// Call exactly once, after all regions are defined. If any allocation
    /// fails the frames taken so far are released and the space is left
    /// unprepared.
    pub fn prepare_load(&mut self) -> Result<(), VmError> {
        assert!(
            self.stack.frames.is_empty() && self.segments.iter().all(|s| s.frames.is_empty()),
            "address space prepared twice"
        );

        let total = self.page_count();
        let mut reservation = FrameReservation::new(&self.allocator, total);
        for _ in 0..total {
            reservation.take_zeroed()?;
        }

        let mut frames = reservation.commit().into_iter();
        for segment in self.segments.iter_mut().chain(core::iter::once(&mut self.stack)) {
            segment.frames.extend(frames.by_ref().take(segment.npages));
        }
        debug!("as: prepared {} frames", total);
        Ok(())
    }

    /// Marks the image as loaded. From now on the TLB maps segment 1 read
    /// only; the TLB is flushed so entries installed during loading go away.
    pub fn complete_load(&mut self, tlb: &Tlb) {
        self.load_complete = true;
        activate(tlb, Some(&*self));
    }

    /// Copies `args` onto the top of the stack as a NULL-terminated `argv`.
    ///
    /// Strings go highest, first argument on top, each NUL-terminated and
    /// padded to 8 bytes. The pointer array sits right below them, its size
    /// also rounded to 8 bytes.
    ///
    /// # Returns
    /// The initial user stack pointer, which is also the address of `argv`.
    pub fn define_stack(&self, args: &[&str]) -> Result<VirtAddr, VmError> {
        assert!(self.stack.is_prepared(), "stack defined before prepare_load");

        let mut total = 0usize;
        let mut argv: Vec<u32> = Vec::with_capacity(args.len() + 1);
        let mut string = Vec::new();
        for arg in args {
            total += (arg.len() + 1).next_multiple_of(8);
            if total > ARG_MAX {
                return Err(VmError::ArgumentListTooLong);
            }
            let dst = VirtAddr::new(USERSTACK - total as u32);
            string.clear();
            string.extend_from_slice(arg.as_bytes());
            string.push(0);
            self.copyout(dst, &string)?;
            argv.push(dst.as_u32());
        }
        argv.push(0);

        total += (4 * argv.len()).next_multiple_of(8);
        if total > ARG_MAX {
            return Err(VmError::ArgumentListTooLong);
        }
        let stackptr = VirtAddr::new(USERSTACK - total as u32);
        let table: Vec<u8> = argv.iter().flat_map(|ptr| ptr.to_be_bytes()).collect();
        self.copyout(stackptr, &table)?;

        debug!("as: {} args, stack pointer {}", args.len(), stackptr);
        Ok(stackptr)
    }

    /// Duplicates the space for a forked child: same geometry, fresh frames,
    /// byte-for-byte copies of every page.
    pub fn copy(&self) -> Result<AddressSpace, VmError> {
        assert!(self.is_prepared(), "copying an unprepared address space");

        let mut child = AddressSpace::new(self.allocator.clone());
        for segment in &self.segments {
            child
                .segments
                .push(Segment::new(segment.vbase, segment.npages, segment.flags));
        }
        // on failure `child` drops here and gives back whatever it holds
        child.prepare_load()?;

        let ram = self.allocator.ram();
        for (dst, src) in child.all_frames().zip(self.all_frames()) {
            ram.copy_frame(dst.start_address(), src.start_address());
        }
        child.load_complete = self.load_complete;
        Ok(child)
    }

    /// Gives every frame back to the allocator.
    pub fn destroy(self) {
        drop(self);
    }

    /// Which region holds `vaddr`: segment 1, then segment 2, then the stack.
    pub fn region_of(&self, vaddr: VirtAddr) -> Option<Region> {
        let regions = [Region::Segment1, Region::Segment2];
        self.segments
            .iter()
            .zip(regions)
            .find(|(segment, _)| segment.contains(vaddr))
            .map(|(_, region)| region)
            .or_else(|| self.stack.contains(vaddr).then_some(Region::Stack))
    }

    /// Physical address behind `vaddr`, if it is mapped and backed.
    pub fn translate(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
        let frame = self.segment(self.region_of(vaddr)?).frame_for(vaddr)?;
        Some(frame.start_address().offset(vaddr.page_offset()))
    }

    /// Copies `data` from the kernel into user memory at `dst`.
    pub fn copyout(&self, dst: VirtAddr, data: &[u8]) -> Result<(), VmError> {
        let mut done = 0;
        while done < data.len() {
            let vaddr = VirtAddr::new(
                dst.as_u32()
                    .checked_add(done as u32)
                    .ok_or(VmError::BadUserAddress(dst))?,
            );
            let paddr = self.translate(vaddr).ok_or(VmError::BadUserAddress(vaddr))?;
            let chunk = (PAGE_SIZE - vaddr.page_offset()) as usize;
            let chunk = chunk.min(data.len() - done);
            self.allocator.ram().write(paddr, &data[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Copies `buf.len()` bytes of user memory at `src` into the kernel.
    pub fn copyin(&self, src: VirtAddr, buf: &mut [u8]) -> Result<(), VmError> {
        let mut done = 0;
        while done < buf.len() {
            let vaddr = VirtAddr::new(
                src.as_u32()
                    .checked_add(done as u32)
                    .ok_or(VmError::BadUserAddress(src))?,
            );
            let paddr = self.translate(vaddr).ok_or(VmError::BadUserAddress(vaddr))?;
            let chunk = (PAGE_SIZE - vaddr.page_offset()) as usize;
            let chunk = chunk.min(buf.len() - done);
            self.allocator.ram().read(paddr, &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(())
    }

    /// Segment 1 or 2, if defined.
    pub fn segment_at(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn stack(&self) -> &Segment {
        &self.stack
    }

    pub fn is_load_complete(&self) -> bool {
        self.load_complete
    }

    /// Whether every page has a frame.
    pub fn is_prepared(&self) -> bool {
        self.stack.is_prepared() && self.segments.iter().all(Segment::is_prepared)
    }

    /// Pages across both segments and the stack.
    pub fn page_count(&self) -> usize {
        self.segments.iter().map(Segment::npages).sum::<usize>() + self.stack.npages
    }

    fn segment(&self, region: Region) -> &Segment {
        match region {
            Region::Segment1 => &self.segments[0],
            Region::Segment2 => &self.segments[1],
            Region::Stack => &self.stack,
        }
    }

    /// Frames in segment 1, segment 2, stack order.
    fn all_frames(&self) -> impl Iterator<Item = &PhysFrame> {
        self.segments
            .iter()
            .chain(core::iter::once(&self.stack))
            .flat_map(|segment| segment.frames.iter())
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let mut freed = 0;
        for segment in self.segments.iter_mut().chain(core::iter::once(&mut self.stack)) {
            for frame in segment.frames.drain(..) {
                self.allocator.free_frames(frame.start_address());
                freed += 1;
            }
        }
        debug!("as: destroyed, {} frames freed", freed);
    }
}

/// Makes `space` the one the TLB serves by flushing every entry; the fault
/// handler refills it on demand. No space means a kernel thread, which
/// leaves the TLB alone.
pub fn activate(tlb: &Tlb, space: Option<&AddressSpace>) {
    if space.is_none() {
        return;
    }
    tlb.splhigh().invalidate_all();
}

/// Nothing to save: the TLB is rebuilt by faults after the next `activate`.
pub fn deactivate(_tlb: &Tlb) {}
