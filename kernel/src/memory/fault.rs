//! TLB fault handling.
//!
//! Every page of a process is backed at load time, so resolving a fault is
//! pure translation: find the region holding the address, look up the frame
//! and install it in the TLB. Nothing here allocates.

use log::debug;

use crate::{
    constants::tlb::{MAX_FAULT_RETRIES, NUM_TLB, VM_FAULT_READ, VM_FAULT_READONLY, VM_FAULT_WRITE},
    devices::tlb::{Access, EntryLoFlags, Tlb, TlbEntry},
    memory::{
        addr::{PhysAddr, VirtAddr},
        address_space::Region,
        error::VmError,
    },
    processes::process::Process,
};

/// Why the CPU trapped into the memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultType {
    /// Load with no matching TLB entry.
    Read,
    /// Store with no matching TLB entry.
    Write,
    /// Store through an entry without the dirty bit.
    ReadOnly,
}

impl TryFrom<u32> for FaultType {
    type Error = VmError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            VM_FAULT_READ => Ok(FaultType::Read),
            VM_FAULT_WRITE => Ok(FaultType::Write),
            VM_FAULT_READONLY => Ok(FaultType::ReadOnly),
            _ => Err(VmError::InvalidFaultType(code)),
        }
    }
}

/// Resolves a fault taken by `current` at `fault_address`.
///
/// # Returns
/// `Ok` once a TLB entry for the page is installed. `ReadOnly` for a store
/// to a write-protected page, `Unmapped` for an address outside every
/// region; both are fatal to the process. `NoAddressSpace` means the fault
/// came from the kernel itself, which must panic rather than fault forever.
///
/// # Panics
/// If the current address space has not been prepared.
pub fn vm_fault(
    tlb: &Tlb,
    current: Option<&Process>,
    fault_type: FaultType,
    fault_address: VirtAddr,
) -> Result<(), VmError> {
    let fault_page = fault_address.align_down();
    debug!("vm: {:?} fault at {}", fault_type, fault_page);

    if fault_type == FaultType::ReadOnly {
        return Err(VmError::ReadOnly(fault_page));
    }

    let Some(process) = current else {
        debug!("vm: fault with no current process");
        return Err(VmError::NoAddressSpace(fault_page));
    };
    let Some(space) = process.address_space() else {
        debug!("vm: fault in pid {} with no address space", process.pid());
        return Err(VmError::NoAddressSpace(fault_page));
    };
    assert!(space.is_prepared(), "fault in an unprepared address space");

    let region = space
        .region_of(fault_page)
        .ok_or(VmError::Unmapped(fault_page))?;
    let paddr = space
        .translate(fault_page)
        .ok_or(VmError::Unmapped(fault_page))?;
    assert!(paddr.is_page_aligned());

    let mut flags = EntryLoFlags::DIRTY | EntryLoFlags::VALID;
    if region == Region::Segment1 && space.is_load_complete() {
        flags.remove(EntryLoFlags::DIRTY);
    }
    install(tlb, TlbEntry::new(fault_page, paddr, flags));
    Ok(())
}

/// Writes `entry` into the first invalid slot, or a random one if all are in use.
fn install(tlb: &Tlb, entry: TlbEntry) {
    let mut regs = tlb.splhigh();
    let free_slot = (0..NUM_TLB).find(|&slot| !regs.read(slot).is_valid());
    let slot = match free_slot {
        Some(slot) => {
            regs.write(entry, slot);
            slot
        }
        None => regs.write_random(entry),
    };
    debug!("vm: {} -> {} in slot {}", entry.vpage(), entry.frame(), slot);
}

/// Performs one user memory access the way the trap path does: translate,
/// and on a fault let [`vm_fault`] fix the TLB and try again.
///
/// # Returns
/// The physical address accessed, or the error the fault handler gave up with.
///
/// # Panics
/// If the access keeps faulting after the fault handler claims success.
pub fn handle_user_access(
    tlb: &Tlb,
    current: Option<&Process>,
    vaddr: VirtAddr,
    access: Access,
) -> Result<PhysAddr, VmError> {
    for _ in 0..MAX_FAULT_RETRIES {
        match tlb.translate(vaddr, access) {
            Ok(paddr) => return Ok(paddr),
            Err(fault_type) => vm_fault(tlb, current, fault_type, vaddr)?,
        }
    }
    panic!("vm: endless faults at {}", vaddr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::memory::{FRAME_SIZE, PAGE_SIZE, STACK_PAGES, USERSTACK},
        devices::ram::Ram,
        memory::{
            address_space::{AddressSpace, RegionFlags},
            frame_allocator::FrameAllocator,
        },
    };
    use alloc::sync::Arc;

    const SEG1: u32 = 0x40_0000;
    const SEG2: u32 = 0x1000_0000;

    fn setup() -> (Arc<FrameAllocator>, Tlb, Process) {
        let ram = Arc::new(Ram::new(128 * PAGE_SIZE, 0));
        let frames = Arc::new(FrameAllocator::new(ram));
        frames.bootstrap();

        let mut space = AddressSpace::new(frames.clone());
        space
            .define_region(VirtAddr::new(SEG1), 2 * FRAME_SIZE, RegionFlags::READ | RegionFlags::EXEC)
            .unwrap();
        space
            .define_region(VirtAddr::new(SEG2), 3 * FRAME_SIZE, RegionFlags::READ | RegionFlags::WRITE)
            .unwrap();
        space.prepare_load().unwrap();

        let mut process = Process::new("faulter");
        process.set_address_space(Some(space));
        (frames, Tlb::new(42), process)
    }

    fn installed(tlb: &Tlb, vpage: u32) -> TlbEntry {
        let regs = tlb.splhigh();
        let slot = regs.probe(VirtAddr::new(vpage)).expect("no entry installed");
        regs.read(slot)
    }

    #[test]
    fn test_fault_codes() {
        assert_eq!(FaultType::try_from(0), Ok(FaultType::Read));
        assert_eq!(FaultType::try_from(1), Ok(FaultType::Write));
        assert_eq!(FaultType::try_from(2), Ok(FaultType::ReadOnly));
        assert_eq!(FaultType::try_from(3), Err(VmError::InvalidFaultType(3)));
    }

    #[test]
    fn test_fault_installs_translation() {
        let (_frames, tlb, process) = setup();
        let space = process.address_space().unwrap();

        let cases = [
            VirtAddr::new(SEG1 + 0x1234),
            VirtAddr::new(SEG2 + 2 * PAGE_SIZE + 8),
            VirtAddr::new(USERSTACK - 4),
            VirtAddr::new(USERSTACK - STACK_PAGES as u32 * PAGE_SIZE),
        ];
        for vaddr in cases {
            vm_fault(&tlb, Some(&process), FaultType::Read, vaddr).unwrap();
            let entry = installed(&tlb, vaddr.align_down().as_u32());
            assert!(entry.is_valid());
            assert!(entry.is_dirty());
            assert_eq!(
                entry.frame().offset(vaddr.page_offset()),
                space.translate(vaddr).unwrap()
            );
            assert_eq!(tlb.translate(vaddr, Access::Load), space.translate(vaddr).ok_or(FaultType::Read));
        }
    }

    #[test]
    fn test_fault_outside_regions() {
        let (_frames, tlb, process) = setup();
        for raw in [
            0,
            SEG1 - 1,
            SEG1 + 2 * PAGE_SIZE,
            SEG2 + 3 * PAGE_SIZE,
            USERSTACK - STACK_PAGES as u32 * PAGE_SIZE - 1,
            USERSTACK,
        ] {
            let vaddr = VirtAddr::new(raw);
            assert_eq!(
                vm_fault(&tlb, Some(&process), FaultType::Write, vaddr),
                Err(VmError::Unmapped(vaddr.align_down()))
            );
        }
        assert_eq!(tlb.splhigh().valid_count(), 0);
    }

    #[test]
    fn test_fault_without_address_space() {
        let tlb = Tlb::new(1);
        let vaddr = VirtAddr::new(SEG1);
        assert_eq!(
            vm_fault(&tlb, None, FaultType::Read, vaddr),
            Err(VmError::NoAddressSpace(vaddr))
        );
        let kernel_thread = Process::new("kthread");
        assert_eq!(
            vm_fault(&tlb, Some(&kernel_thread), FaultType::Read, vaddr),
            Err(VmError::NoAddressSpace(vaddr))
        );
    }

    #[test]
    fn test_readonly_fault_is_reported() {
        let (_frames, tlb, process) = setup();
        let vaddr = VirtAddr::new(SEG2 + 0x10);
        assert_eq!(
            vm_fault(&tlb, Some(&process), FaultType::ReadOnly, vaddr),
            Err(VmError::ReadOnly(VirtAddr::new(SEG2)))
        );
    }

    #[test]
    fn test_segment1_readonly_after_load() {
        let (_frames, tlb, mut process) = setup();

        // loading writes freely
        assert!(handle_user_access(&tlb, Some(&process), VirtAddr::new(SEG1 + 4), Access::Store).is_ok());

        process.address_space_mut().unwrap().complete_load(&tlb);
        assert_eq!(tlb.splhigh().valid_count(), 0);

        assert_eq!(
            handle_user_access(&tlb, Some(&process), VirtAddr::new(SEG1 + 4), Access::Store),
            Err(VmError::ReadOnly(VirtAddr::new(SEG1)))
        );
        assert!(handle_user_access(&tlb, Some(&process), VirtAddr::new(SEG1 + 4), Access::Load).is_ok());
        assert!(!installed(&tlb, SEG1).is_dirty());

        for raw in [SEG2 + 4, USERSTACK - 2 * PAGE_SIZE + 4] {
            let paddr = handle_user_access(&tlb, Some(&process), VirtAddr::new(raw), Access::Store).unwrap();
            let entry = installed(&tlb, raw & !0xfff);
            assert!(entry.is_dirty() && entry.is_valid());
            assert_eq!(paddr, process.address_space().unwrap().translate(VirtAddr::new(raw)).unwrap());
        }
    }

    #[test]
    fn test_full_tlb_evicts_randomly() {
        let ram = Arc::new(Ram::new(256 * PAGE_SIZE, 0));
        let frames = Arc::new(FrameAllocator::new(ram));
        frames.bootstrap();
        let mut space = AddressSpace::new(frames.clone());
        space
            .define_region(VirtAddr::new(SEG1), (NUM_TLB + 8) * FRAME_SIZE, RegionFlags::all())
            .unwrap();
        space.prepare_load().unwrap();
        let mut process = Process::new("big");
        process.set_address_space(Some(space));
        let tlb = Tlb::new(3);

        for page in 0..NUM_TLB as u32 {
            vm_fault(&tlb, Some(&process), FaultType::Read, VirtAddr::new(SEG1 + page * PAGE_SIZE)).unwrap();
        }
        assert_eq!(tlb.splhigh().valid_count(), NUM_TLB);

        for page in NUM_TLB as u32..NUM_TLB as u32 + 8 {
            let vaddr = VirtAddr::new(SEG1 + page * PAGE_SIZE);
            vm_fault(&tlb, Some(&process), FaultType::Read, vaddr).unwrap();
            assert!(tlb.translate(vaddr, Access::Load).is_ok());
            assert_eq!(tlb.splhigh().valid_count(), NUM_TLB);
        }
    }

    #[test]
    fn test_translation_matches_frame_plus_offset() {
        let (_frames, tlb, process) = setup();
        let space = process.address_space().unwrap();
        let seg2 = space.segment_at(1).unwrap();
        for offset in (0..3 * PAGE_SIZE).step_by(0x3f1) {
            let vaddr = VirtAddr::new(SEG2 + offset);
            let paddr = handle_user_access(&tlb, Some(&process), vaddr, Access::Load).unwrap();
            let frame = seg2.frames()[(offset / PAGE_SIZE) as usize];
            assert_eq!(paddr, frame.start_address().offset(offset % PAGE_SIZE));
        }
    }
}
