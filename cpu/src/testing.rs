//! Machines and programs for the unit tests.
use std::ops::Range;

use base::prelude::*;

use crate::config::{MachineConfiguration, Variant};
use crate::context::AddressSpace;
use crate::kn10::Kn10;

pub(crate) fn config(variant: Variant) -> MachineConfiguration {
    MachineConfiguration {
        variant,
        memory_words: 0o100_000,
        ..MachineConfiguration::default()
    }
}

pub(crate) fn machine(variant: Variant) -> Kn10 {
    Kn10::new(config(variant)).expect("test configuration should be valid")
}

pub(crate) fn op(opcode: u16, ac: u8, y: u32) -> Word {
    Instruction::from_fields(opcode, ac, false, 0, y).word()
}

pub(crate) fn put(kn: &mut Kn10, addr: u32, w: Word) {
    kn.write_physical(PhysicalAddress::new(addr), w)
        .expect("test address should exist");
}

pub(crate) fn get(kn: &Kn10, addr: u32) -> Word {
    kn.read_physical(PhysicalAddress::new(addr))
        .expect("test address should exist")
}

/// Load `words` at consecutive addresses from `start` and point the
/// PC at the first.
pub(crate) fn program(kn: &mut Kn10, start: u32, words: &[Word]) {
    for (addr, w) in (start..).zip(words.iter()) {
        put(kn, addr, *w);
    }
    kn.set_pc(VirtualAddress::new(0, start));
}

/// Map `pages` of `space` one-to-one onto physical memory, writable.
pub(crate) fn identity_map(kn: &mut Kn10, space: AddressSpace, pages: Range<u32>) {
    for page in pages {
        kn.map_page(space, page, page, true)
            .expect("test page should exist");
    }
}
