//! Addresses.
//!
//! A virtual address on the extended-addressing processor is 30 bits
//! wide: a 12-bit section number and an 18-bit offset within the
//! section.  The flat (single-section) processor only ever uses
//! section zero, so the same type serves both.
//!
//! Address arithmetic comes in two flavours.  "Local" arithmetic
//! wraps within the 18-bit offset and never changes the section;
//! this is what the program counter does, and what indexing does in
//! section 0.  "Global" arithmetic wraps within the whole 30-bit
//! space and may carry into the section number.
use std::fmt::{self, Debug, Display, Formatter, Octal};

use serde::Serialize;

#[cfg(test)]
use test_strategy::Arbitrary;

use super::word::{Word, HALF_MASK};

/// Mask for the 30 bits of a virtual address.
pub const VADDR_MASK: u32 = 0o7777_777777;

/// Mask for the 12-bit section number.
pub const SECTION_MASK: u32 = 0o7777;

/// Number of words in a page.
pub const PAGE_SIZE: u32 = 0o1000;

/// Number of pages in a section.
pub const PAGES_PER_SECTION: u32 = 0o1000;

/// The `IndexBy` trait implements address arithmetic (adding an
/// index value to an address).
pub trait IndexBy<T> {
    /// Index within the current section.
    fn local_index_by(&self, delta: T) -> VirtualAddress;
    /// Index across the whole virtual address space.
    fn global_index_by(&self, delta: T) -> VirtualAddress;
}

#[cfg_attr(test, derive(Arbitrary))]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct VirtualAddress(#[cfg_attr(test, strategy(0..=VADDR_MASK))] u32);

impl VirtualAddress {
    pub const ZERO: VirtualAddress = VirtualAddress(0);

    pub const fn new(section: u32, offset: u32) -> VirtualAddress {
        VirtualAddress(((section & SECTION_MASK) << 18) | (offset & HALF_MASK))
    }

    /// Build an address from the low 30 bits of `bits`.
    pub const fn from_bits(bits: u32) -> VirtualAddress {
        VirtualAddress(bits & VADDR_MASK)
    }

    /// Build an address from the low 30 bits of a word (as found in a
    /// global index register or an extended-format indirect word).
    pub fn from_word(w: Word) -> VirtualAddress {
        VirtualAddress((w.bits() as u32) & VADDR_MASK)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn section(self) -> u32 {
        self.0 >> 18
    }

    pub const fn offset(self) -> u32 {
        self.0 & HALF_MASK
    }

    pub const fn with_offset(self, offset: u32) -> VirtualAddress {
        VirtualAddress::new(self.section(), offset)
    }

    /// The virtual page number across the whole space (section * 512
    /// plus the page within the section).
    pub const fn page(self) -> u32 {
        self.0 / PAGE_SIZE
    }

    pub const fn word_in_page(self) -> u32 {
        self.0 % PAGE_SIZE
    }

    /// The address of the next word in the same section.  This is
    /// how the program counter is incremented: it wraps from 777777
    /// to 0 without changing the section.
    pub fn successor(self) -> VirtualAddress {
        self.local_index_by(1_u32)
    }

    /// Addresses 0-17 of any section (in the sense of an 18-bit
    /// offset) refer to the accumulators when used locally.
    pub const fn is_ac_address(self) -> bool {
        self.offset() < 0o20
    }
}

impl IndexBy<u32> for VirtualAddress {
    fn local_index_by(&self, delta: u32) -> VirtualAddress {
        self.with_offset(self.offset().wrapping_add(delta) & HALF_MASK)
    }

    fn global_index_by(&self, delta: u32) -> VirtualAddress {
        VirtualAddress::from_bits(self.0.wrapping_add(delta))
    }
}

impl IndexBy<Word> for VirtualAddress {
    /// Local indexing uses only the right half of the index value.
    fn local_index_by(&self, delta: Word) -> VirtualAddress {
        self.local_index_by(delta.rh())
    }

    fn global_index_by(&self, delta: Word) -> VirtualAddress {
        self.global_index_by(delta.bits() as u32)
    }
}

impl Display for VirtualAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        if self.section() == 0 {
            write!(f, "{:06o}", self.offset())
        } else {
            write!(f, "{:o},,{:06o}", self.section(), self.offset())
        }
    }
}

impl Debug for VirtualAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "VirtualAddress({self})")
    }
}

impl Octal for VirtualAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        Octal::fmt(&self.0, f)
    }
}

/// A physical (post-translation) word address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    pub const fn new(addr: u32) -> PhysicalAddress {
        PhysicalAddress(addr)
    }

    pub const fn from_page(page: u32, word_in_page: u32) -> PhysicalAddress {
        PhysicalAddress(page * PAGE_SIZE + (word_in_page % PAGE_SIZE))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn page(self) -> u32 {
        self.0 / PAGE_SIZE
    }

    pub const fn plus(self, delta: u32) -> PhysicalAddress {
        PhysicalAddress(self.0 + delta)
    }
}

impl Display for PhysicalAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:08o}", self.0)
    }
}

impl Debug for PhysicalAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "PhysicalAddress({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[test]
    fn pc_increment_wraps_within_section() {
        let a = VirtualAddress::new(3, 0o777777);
        let next = a.successor();
        assert_eq!(next.section(), 3);
        assert_eq!(next.offset(), 0);
    }

    #[test]
    fn global_indexing_carries_into_section() {
        let a = VirtualAddress::new(3, 0o777777);
        let next = a.global_index_by(1_u32);
        assert_eq!(next.section(), 4);
        assert_eq!(next.offset(), 0);
    }

    #[test]
    fn local_indexing_by_negative_word() {
        // -1 in the right half subtracts one.
        let a = VirtualAddress::new(1, 0o100);
        let minus_one = Word::MAX;
        assert_eq!(a.local_index_by(minus_one), VirtualAddress::new(1, 0o77));
    }

    #[test]
    fn display() {
        assert_eq!(VirtualAddress::new(0, 0o1234).to_string(), "001234");
        assert_eq!(VirtualAddress::new(2, 0o1234).to_string(), "2,,001234");
    }

    #[proptest]
    fn local_indexing_preserves_section(a: VirtualAddress, delta: u32) {
        proptest::prop_assert_eq!(a.local_index_by(delta).section(), a.section());
    }
}
