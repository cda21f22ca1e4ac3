//! This module emulates main memory and the pager.
//!
//! Physical memory is a flat array of 36-bit words.  When paging is
//! off, virtual addresses are physical addresses.  When paging is on,
//! each of the two address spaces (exec and user) has its own page
//! map, indexed by the 21-bit virtual page number (12-bit section,
//! 9-bit page within section).  A map entry names a physical page and
//! says whether the page may be written.
//!
//! The page maps are maintained by the host (the loader, or a test)
//! through [`MemoryUnit::map_page`] and [`MemoryUnit::unmap_page`]; the
//! guest's own page-table walk is not emulated.  Every change to a
//! map bumps a generation counter, which is how the instruction loop
//! knows that its fetch cache is stale.
//!
//! Two physical pages are special: the exec process table (EPT,
//! which holds the interrupt vectors) and the user process table (UPT,
//! which holds the trap, MUUO and page-fail vectors).  The guest sets
//! them with CONO PAG and DATAO PAG.
use std::error;
use std::fmt::{self, Debug, Display, Formatter};

use tracing::{event, Level};

use base::prelude::*;

use super::abort::{PageFailure, PageFailureCause};
use super::context::AddressSpace;

/// Number of virtual pages in each address space.
pub const VIRTUAL_PAGES: usize = 32 * PAGES_PER_SECTION as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryOpFailure {
    /// The physical address is beyond the end of memory.
    NonExistent(PhysicalAddress),
    /// The virtual page number is out of range.
    NoSuchVirtualPage(u32),
    /// The physical page number is beyond the end of memory.
    NoSuchPhysicalPage(u32),
}

impl Display for MemoryOpFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            MemoryOpFailure::NonExistent(addr) => {
                write!(f, "physical address {addr} is beyond the end of memory")
            }
            MemoryOpFailure::NoSuchVirtualPage(page) => {
                write!(f, "virtual page {page:o} does not exist")
            }
            MemoryOpFailure::NoSuchPhysicalPage(page) => {
                write!(f, "physical page {page:o} is beyond the end of memory")
            }
        }
    }
}

impl error::Error for MemoryOpFailure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMapEntry {
    pub physical_page: u32,
    pub writable: bool,
}

pub struct MemoryUnit {
    words: Vec<Word>,
    exec_map: Vec<Option<PageMapEntry>>,
    user_map: Vec<Option<PageMapEntry>>,
    generation: u64,
    paging: bool,
    ept_page: u32,
    upt_page: u32,
}

impl Debug for MemoryUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("MemoryUnit")
            .field("size", &self.words.len())
            .field("generation", &self.generation)
            .field("paging", &self.paging)
            .field("ept_page", &self.ept_page)
            .field("upt_page", &self.upt_page)
            .finish_non_exhaustive()
    }
}

impl MemoryUnit {
    /// Create a memory of `size` words (rounded up to a whole number
    /// of pages).
    pub fn new(size: usize) -> MemoryUnit {
        let page = PAGE_SIZE as usize;
        let size = size.div_ceil(page) * page;
        MemoryUnit {
            words: vec![Word::ZERO; size],
            exec_map: vec![None; VIRTUAL_PAGES],
            user_map: vec![None; VIRTUAL_PAGES],
            generation: 0,
            paging: false,
            ept_page: 0,
            upt_page: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.words.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn changed(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn paging(&self) -> bool {
        self.paging
    }

    pub fn set_paging(&mut self, enabled: bool) {
        if enabled != self.paging {
            event!(Level::DEBUG, "paging {}", if enabled { "on" } else { "off" });
            self.paging = enabled;
            self.changed();
        }
    }

    pub fn ept_page(&self) -> u32 {
        self.ept_page
    }

    pub fn set_ept_page(&mut self, page: u32) {
        self.ept_page = page;
    }

    pub fn upt_page(&self) -> u32 {
        self.upt_page
    }

    pub fn set_upt_page(&mut self, page: u32) {
        self.upt_page = page;
    }

    /// Physical address of a location in the exec process table.
    pub fn ept_address(&self, offset: u32) -> PhysicalAddress {
        PhysicalAddress::from_page(self.ept_page, offset)
    }

    /// Physical address of a location in the user process table.
    pub fn upt_address(&self, offset: u32) -> PhysicalAddress {
        PhysicalAddress::from_page(self.upt_page, offset)
    }

    fn index_of(&self, addr: PhysicalAddress) -> Result<usize, MemoryOpFailure> {
        let index = addr.bits() as usize;
        if index < self.words.len() {
            Ok(index)
        } else {
            Err(MemoryOpFailure::NonExistent(addr))
        }
    }

    pub fn read_physical(&self, addr: PhysicalAddress) -> Result<Word, MemoryOpFailure> {
        let index = self.index_of(addr)?;
        Ok(self.words[index])
    }

    pub fn write_physical(
        &mut self,
        addr: PhysicalAddress,
        value: Word,
    ) -> Result<(), MemoryOpFailure> {
        let index = self.index_of(addr)?;
        self.words[index] = value;
        Ok(())
    }

    fn map_for(&self, space: AddressSpace) -> &[Option<PageMapEntry>] {
        match space {
            AddressSpace::Exec => &self.exec_map,
            AddressSpace::User => &self.user_map,
        }
    }

    fn map_for_mut(&mut self, space: AddressSpace) -> &mut [Option<PageMapEntry>] {
        match space {
            AddressSpace::Exec => &mut self.exec_map,
            AddressSpace::User => &mut self.user_map,
        }
    }

    pub fn map_page(
        &mut self,
        space: AddressSpace,
        virtual_page: u32,
        physical_page: u32,
        writable: bool,
    ) -> Result<(), MemoryOpFailure> {
        if (physical_page as usize) * (PAGE_SIZE as usize) >= self.words.len() {
            return Err(MemoryOpFailure::NoSuchPhysicalPage(physical_page));
        }
        let slot = self
            .map_for_mut(space)
            .get_mut(virtual_page as usize)
            .ok_or(MemoryOpFailure::NoSuchVirtualPage(virtual_page))?;
        *slot = Some(PageMapEntry {
            physical_page,
            writable,
        });
        self.changed();
        Ok(())
    }

    pub fn unmap_page(
        &mut self,
        space: AddressSpace,
        virtual_page: u32,
    ) -> Result<(), MemoryOpFailure> {
        let slot = self
            .map_for_mut(space)
            .get_mut(virtual_page as usize)
            .ok_or(MemoryOpFailure::NoSuchVirtualPage(virtual_page))?;
        *slot = None;
        self.changed();
        Ok(())
    }

    pub fn page_map_entry(&self, space: AddressSpace, virtual_page: u32) -> Option<PageMapEntry> {
        self.map_for(space)
            .get(virtual_page as usize)
            .copied()
            .flatten()
    }

    /// Translate a virtual address.  The result is not checked
    /// against the size of memory; that happens on the reference
    /// itself.
    pub fn translate(
        &self,
        space: AddressSpace,
        addr: VirtualAddress,
        write: bool,
    ) -> Result<PhysicalAddress, PageFailure> {
        if !self.paging {
            return Ok(PhysicalAddress::new(addr.bits()));
        }
        match self.page_map_entry(space, addr.page()) {
            None => Err(PageFailure::new(
                PageFailureCause::NotMapped,
                addr,
                space,
                write,
            )),
            Some(entry) if write && !entry.writable => Err(PageFailure::new(
                PageFailureCause::WriteProtected,
                addr,
                space,
                write,
            )),
            Some(entry) => Ok(PhysicalAddress::from_page(
                entry.physical_page,
                addr.word_in_page(),
            )),
        }
    }

    /// Read a word through the page map.
    pub fn read_virtual(
        &self,
        space: AddressSpace,
        addr: VirtualAddress,
    ) -> Result<Word, PageFailure> {
        let phys = self.translate(space, addr, false)?;
        self.read_physical(phys).map_err(|_| {
            PageFailure::new(PageFailureCause::NonExistentMemory, addr, space, false)
        })
    }

    /// Write a word through the page map.
    pub fn write_virtual(
        &mut self,
        space: AddressSpace,
        addr: VirtualAddress,
        value: Word,
    ) -> Result<(), PageFailure> {
        let phys = self.translate(space, addr, true)?;
        self.write_physical(phys, value).map_err(|_| {
            PageFailure::new(PageFailureCause::NonExistentMemory, addr, space, true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpaged_addresses_are_physical() {
        let mut mem = MemoryUnit::new(0o2000);
        mem.write_virtual(AddressSpace::User, VirtualAddress::new(0, 0o1500), Word::ONE)
            .expect("address exists");
        assert_eq!(
            mem.read_physical(PhysicalAddress::new(0o1500)),
            Ok(Word::ONE)
        );
        let pf = mem
            .read_virtual(AddressSpace::Exec, VirtualAddress::new(0, 0o2000))
            .expect_err("beyond the end of memory");
        assert!(pf.is_non_existent_memory());
    }

    #[test]
    fn paged_translation() {
        let mut mem = MemoryUnit::new(0o10000);
        mem.set_paging(true);
        let g = mem.generation();
        // Section 1, page 2 maps to physical page 5.
        mem.map_page(AddressSpace::User, 0o1002, 5, false)
            .expect("valid pages");
        assert_ne!(mem.generation(), g);
        let va = VirtualAddress::new(1, 0o2017);
        assert_eq!(
            mem.translate(AddressSpace::User, va, false),
            Ok(PhysicalAddress::new(0o5017))
        );
        assert_eq!(
            mem.translate(AddressSpace::User, va, true)
                .map_err(|pf| pf.cause),
            Err(PageFailureCause::WriteProtected)
        );
        assert_eq!(
            mem.translate(AddressSpace::Exec, va, false)
                .map_err(|pf| pf.cause),
            Err(PageFailureCause::NotMapped)
        );
        mem.unmap_page(AddressSpace::User, 0o1002).expect("valid page");
        assert!(mem.translate(AddressSpace::User, va, false).is_err());
    }

    #[test]
    fn bad_page_numbers_are_rejected() {
        let mut mem = MemoryUnit::new(0o1000);
        assert_eq!(
            mem.map_page(AddressSpace::Exec, 0, 1, true),
            Err(MemoryOpFailure::NoSuchPhysicalPage(1))
        );
        assert_eq!(
            mem.map_page(AddressSpace::Exec, VIRTUAL_PAGES as u32, 0, true),
            Err(MemoryOpFailure::NoSuchVirtualPage(VIRTUAL_PAGES as u32))
        );
    }
}
