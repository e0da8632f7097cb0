//! Software-managed MIPS TLB.
//!
//! The registers sit behind a single lock. Holding [`TlbGuard`] is the
//! simulator's equivalent of running with interrupts masked: nothing else may
//! touch the TLB until it is dropped.

use bitflags::bitflags;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use spin::{Mutex, MutexGuard};

use crate::{
    constants::tlb::{tlbhi_invalid, tlblo_invalid, NUM_TLB, TLBHI_VPAGE, TLBLO_PPAGE},
    memory::{
        addr::{PhysAddr, VirtAddr},
        fault::FaultType,
    },
};

bitflags! {
    /// Control bits of EntryLo.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryLoFlags: u32 {
        const NOCACHE = 1 << 11;
        /// Writes allowed. Without it a store raises a modify fault.
        const DIRTY = 1 << 10;
        const VALID = 1 << 9;
        const GLOBAL = 1 << 8;
    }
}

/// Kind of memory access the CPU is performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Load,
    Store,
}

/// One TLB slot: EntryHi and EntryLo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub hi: u32,
    pub lo: u32,
}

impl TlbEntry {
    pub fn new(vpage: VirtAddr, frame: PhysAddr, flags: EntryLoFlags) -> Self {
        TlbEntry {
            hi: vpage.as_u32() & TLBHI_VPAGE,
            lo: (frame.as_u32() & TLBLO_PPAGE) | flags.bits(),
        }
    }

    /// The entry written into `slot` when it is flushed.
    pub const fn invalid(slot: usize) -> Self {
        TlbEntry {
            hi: tlbhi_invalid(slot),
            lo: tlblo_invalid(),
        }
    }

    pub fn flags(&self) -> EntryLoFlags {
        EntryLoFlags::from_bits_truncate(self.lo)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(EntryLoFlags::VALID)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(EntryLoFlags::DIRTY)
    }

    pub fn vpage(&self) -> VirtAddr {
        VirtAddr::new(self.hi & TLBHI_VPAGE)
    }

    pub fn frame(&self) -> PhysAddr {
        PhysAddr::new(self.lo & TLBLO_PPAGE)
    }
}

/// Raw register file.
pub struct TlbRegisters {
    entries: [TlbEntry; NUM_TLB],
    random: SmallRng,
}

pub type TlbGuard<'a> = MutexGuard<'a, TlbRegisters>;

impl TlbRegisters {
    fn new(seed: u64) -> Self {
        let mut entries = [TlbEntry::invalid(0); NUM_TLB];
        for (slot, entry) in entries.iter_mut().enumerate() {
            *entry = TlbEntry::invalid(slot);
        }
        TlbRegisters {
            entries,
            random: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn read(&self, slot: usize) -> TlbEntry {
        self.entries[slot]
    }

    pub fn write(&mut self, entry: TlbEntry, slot: usize) {
        self.entries[slot] = entry;
    }

    /// Writes `entry` into a slot chosen by the random register.
    ///
    /// # Returns
    /// The slot that was overwritten
    pub fn write_random(&mut self, entry: TlbEntry) -> usize {
        let slot = self.random.gen_range(0..NUM_TLB);
        self.entries[slot] = entry;
        slot
    }

    /// Finds the slot whose EntryHi maps `vpage`, valid or not.
    pub fn probe(&self, vpage: VirtAddr) -> Option<usize> {
        let hi = vpage.as_u32() & TLBHI_VPAGE;
        self.entries.iter().position(|entry| entry.hi == hi)
    }

    /// Flushes every slot.
    pub fn invalidate_all(&mut self) {
        for slot in 0..NUM_TLB {
            self.entries[slot] = TlbEntry::invalid(slot);
        }
    }

    pub fn valid_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_valid()).count()
    }
}

/// The TLB of the single simulated CPU.
pub struct Tlb {
    regs: Mutex<TlbRegisters>,
}

impl Tlb {
    pub fn new(seed: u64) -> Self {
        Tlb {
            regs: Mutex::new(TlbRegisters::new(seed)),
        }
    }

    /// Takes exclusive access to the TLB registers for the lifetime of the guard.
    pub fn splhigh(&self) -> TlbGuard<'_> {
        self.regs.lock()
    }

    /// Translates a user access the way the MMU does.
    ///
    /// # Returns
    /// The physical address, or the fault the hardware would raise: a miss
    /// for the access kind, or `ReadOnly` for a store through a clean entry.
    pub fn translate(&self, vaddr: VirtAddr, access: Access) -> Result<PhysAddr, FaultType> {
        let miss = match access {
            Access::Load => FaultType::Read,
            Access::Store => FaultType::Write,
        };
        let regs = self.regs.lock();
        let entry = regs
            .probe(vaddr.align_down())
            .map(|slot| regs.read(slot))
            .filter(TlbEntry::is_valid)
            .ok_or(miss)?;
        if access == Access::Store && !entry.is_dirty() {
            return Err(FaultType::ReadOnly);
        }
        Ok(entry.frame().offset(vaddr.page_offset()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_tlb_is_invalid() {
        let tlb = Tlb::new(1);
        let regs = tlb.splhigh();
        assert_eq!(regs.valid_count(), 0);
        for slot in 0..NUM_TLB {
            assert_eq!(regs.read(slot), TlbEntry::invalid(slot));
        }
    }

    #[test]
    fn test_invalid_entries_are_distinct() {
        for a in 0..NUM_TLB {
            for b in (a + 1)..NUM_TLB {
                assert_ne!(TlbEntry::invalid(a).hi, TlbEntry::invalid(b).hi);
            }
        }
    }

    #[test]
    fn test_translate_hits_and_misses() {
        let tlb = Tlb::new(1);
        let entry = TlbEntry::new(
            VirtAddr::new(0x40_0000),
            PhysAddr::new(0x7_3000),
            EntryLoFlags::VALID | EntryLoFlags::DIRTY,
        );
        tlb.splhigh().write(entry, 5);

        assert_eq!(
            tlb.translate(VirtAddr::new(0x40_0123), Access::Load),
            Ok(PhysAddr::new(0x7_3123))
        );
        assert_eq!(
            tlb.translate(VirtAddr::new(0x40_1000), Access::Load),
            Err(FaultType::Read)
        );
        assert_eq!(
            tlb.translate(VirtAddr::new(0x40_1000), Access::Store),
            Err(FaultType::Write)
        );
    }

    #[test]
    fn test_store_through_clean_entry_faults() {
        let tlb = Tlb::new(1);
        let entry = TlbEntry::new(
            VirtAddr::new(0x40_0000),
            PhysAddr::new(0x7_3000),
            EntryLoFlags::VALID,
        );
        tlb.splhigh().write(entry, 0);

        assert!(tlb.translate(VirtAddr::new(0x40_0004), Access::Load).is_ok());
        assert_eq!(
            tlb.translate(VirtAddr::new(0x40_0004), Access::Store),
            Err(FaultType::ReadOnly)
        );
    }

    #[test]
    fn test_invalidate_all() {
        let tlb = Tlb::new(7);
        let mut regs = tlb.splhigh();
        for i in 0..10u32 {
            regs.write_random(TlbEntry::new(
                VirtAddr::new(i * 0x1000),
                PhysAddr::new(i * 0x1000),
                EntryLoFlags::VALID,
            ));
        }
        assert!(regs.valid_count() > 0);
        regs.invalidate_all();
        assert_eq!(regs.valid_count(), 0);
    }
}
