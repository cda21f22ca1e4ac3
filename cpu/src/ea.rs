//! Effective address calculation.
//!
//! On the flat processor, E is Y, plus the right half of the index
//! register if X is non-zero, and if I is set the calculation
//! repeats with the I, X and Y fields of the word at E.
//!
//! On the extended processor addresses are 30 bits and the
//! calculation distinguishes *local* from *global* addresses:
//!
//! | Situation | Indexing |
//! | --------- | -------- |
//! | section 0 | local: `section,,(Y + RH(X))` |
//! | index register negative | local |
//! | index register bits 6-17 zero | local |
//! | otherwise | global: `(C(X) + signext(Y)) mod 2^30` |
//!
//! An indirect word fetched from section 0 is always in instruction
//! format (IFIW).  Fetched from any other section, bit 0 clear means
//! an extended-format word (EFIW: bit 1 is I, bits 2-5 are X, bits
//! 6-35 a 30-bit global Y), bits 0-1 = 10 mean an IFIW local to the
//! section the word came from, and 11 is illegal (a page failure).
//!
//! Indirection chains can be arbitrarily long (or infinite).  Before
//! every hop after the first, the resolver asks whether anything
//! needs attention; if so, the instruction is abandoned with
//! [`Abort::Interrupted`] and restarted from scratch later.  The
//! first hop is always completed.
use base::prelude::*;

use super::abort::{Abort, PageFailure, PageFailureCause};
use super::context::AddressSpace;

/// The view of the machine which address calculation needs.
pub trait EaMemory {
    /// Contents of index register `x`, from the AC block in use for
    /// address calculation.
    fn index_register(&mut self, x: u8) -> Word;

    /// Fetch an indirect word.
    fn fetch_indirect(&mut self, address: VirtualAddress, global: bool) -> Result<Word, Abort>;

    /// Does something need attention?  Called before every hop of an
    /// indirection chain after the first.
    fn attention(&mut self) -> bool;

    /// The address space indirect words are fetched from.
    fn address_space(&self) -> AddressSpace;
}

/// A resolved effective address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ea {
    pub address: VirtualAddress,
    /// True when the address came from global indexing or an EFIW.
    pub global: bool,
    /// The last word which contributed to the calculation (the
    /// instruction, an index register or an indirect word); JRSTF
    /// takes its new flags from the left half of this word.
    pub flag_word: Word,
}

impl Ea {
    /// An address with no calculation behind it.
    pub fn local(address: VirtualAddress) -> Ea {
        Ea {
            address,
            global: false,
            flag_word: Word::ZERO,
        }
    }

    /// Does this address refer to an accumulator?  Local addresses
    /// 0-17 do, as do global addresses 0-17 in sections 0 and 1.
    pub fn is_ac(&self) -> bool {
        self.address.is_ac_address() && (!self.global || self.address.section() <= 1)
    }

    /// The address `n` words on (E+1 and so on), wrapping within the
    /// section unless the address is global.
    pub fn plus(self, n: u32) -> Ea {
        let address = if self.global {
            self.address.global_index_by(n)
        } else {
            self.address.local_index_by(n)
        };
        Ea { address, ..self }
    }
}

/// Where the calculation has got to.
#[derive(Debug, Clone, Copy)]
enum Step {
    Local {
        section: u32,
        indirect: bool,
        index: u8,
        y: u32,
    },
    Global {
        indirect: bool,
        index: u8,
        address: VirtualAddress,
    },
}

fn resolve_flat<M: EaMemory>(m: &mut M, inst: Instruction) -> Result<Ea, Abort> {
    let (mut indirect, mut index, mut y) = (inst.indirect(), inst.index(), inst.y());
    let mut flag_word = inst.word();
    let mut hops: u32 = 0;
    loop {
        let mut e = y;
        if index != 0 {
            let x = m.index_register(index);
            e = half_add(e, x.rh());
            flag_word = x;
        }
        let address = VirtualAddress::new(0, e);
        if !indirect {
            return Ok(Ea {
                address,
                global: false,
                flag_word,
            });
        }
        if hops > 0 && m.attention() {
            return Err(Abort::Interrupted);
        }
        hops += 1;
        let w = m.fetch_indirect(address, false)?;
        flag_word = w;
        let next = Instruction::from(w);
        indirect = next.indirect();
        index = next.index();
        y = next.y();
    }
}

fn resolve_extended<M: EaMemory>(
    m: &mut M,
    inst: Instruction,
    default_section: u32,
) -> Result<Ea, Abort> {
    let mut step = Step::Local {
        section: default_section,
        indirect: inst.indirect(),
        index: inst.index(),
        y: inst.y(),
    };
    let mut flag_word = inst.word();
    let mut hops: u32 = 0;
    loop {
        let (address, global, indirect) = match step {
            Step::Local {
                section,
                indirect,
                index,
                y,
            } => {
                if index == 0 {
                    (VirtualAddress::new(section, y), false, indirect)
                } else {
                    let x = m.index_register(index);
                    flag_word = x;
                    let local = section == 0 || x.is_negative() || x.lh() & SECTION_MASK == 0;
                    if local {
                        (VirtualAddress::new(section, half_add(y, x.rh())), false, indirect)
                    } else {
                        let base = VirtualAddress::from_word(x);
                        (base.global_index_by(sign_extend_half(y)), true, indirect)
                    }
                }
            }
            Step::Global {
                indirect,
                index,
                address,
            } => {
                if index == 0 {
                    (address, true, indirect)
                } else {
                    let x = m.index_register(index);
                    flag_word = x;
                    (address.global_index_by(x), true, indirect)
                }
            }
        };
        if !indirect {
            return Ok(Ea {
                address,
                global,
                flag_word,
            });
        }
        if hops > 0 && m.attention() {
            return Err(Abort::Interrupted);
        }
        hops += 1;
        let w = m.fetch_indirect(address, global)?;
        flag_word = w;
        step = match IndirectWord::decode(w, address.section() != 0) {
            IndirectWord::Local { indirect, index, y } => Step::Local {
                section: address.section(),
                indirect,
                index,
                y,
            },
            IndirectWord::Global {
                indirect,
                index,
                address,
            } => Step::Global {
                indirect,
                index,
                address,
            },
            IndirectWord::Illegal => {
                return Err(Abort::PageFail(PageFailure::new(
                    PageFailureCause::IllegalIndirect,
                    address,
                    m.address_space(),
                    false,
                )));
            }
        };
    }
}

/// Compute the effective address of `inst`.  `default_section` is
/// the section a local address lies in (normally the section the
/// instruction was fetched from); it is ignored on the flat
/// processor.
pub fn resolve<M: EaMemory>(
    m: &mut M,
    inst: Instruction,
    default_section: u32,
    extended: bool,
) -> Result<Ea, Abort> {
    if extended {
        resolve_extended(m, inst, default_section)
    } else {
        resolve_flat(m, inst)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[derive(Debug, Default)]
    struct FakeMemory {
        words: HashMap<VirtualAddress, Word>,
        acs: [Word; 16],
        attention: bool,
        fetches: Vec<VirtualAddress>,
    }

    impl FakeMemory {
        fn with(words: &[(VirtualAddress, Word)]) -> FakeMemory {
            FakeMemory {
                words: words.iter().copied().collect(),
                ..FakeMemory::default()
            }
        }
    }

    impl EaMemory for FakeMemory {
        fn index_register(&mut self, x: u8) -> Word {
            self.acs[usize::from(x)]
        }

        fn fetch_indirect(&mut self, address: VirtualAddress, _global: bool) -> Result<Word, Abort> {
            self.fetches.push(address);
            Ok(self.words.get(&address).copied().unwrap_or(Word::ZERO))
        }

        fn attention(&mut self) -> bool {
            self.attention
        }

        fn address_space(&self) -> AddressSpace {
            AddressSpace::Exec
        }
    }

    fn va(section: u32, offset: u32) -> VirtualAddress {
        VirtualAddress::new(section, offset)
    }

    fn ifiw(indirect: bool, index: u8, y: u32) -> Word {
        Instruction::from_fields(0, 0, indirect, index, y).word()
    }

    fn move_inst(indirect: bool, index: u8, y: u32) -> Instruction {
        Instruction::from_fields(opcodes::MOVE, 1, indirect, index, y)
    }

    #[test]
    fn flat_indexing_wraps_at_18_bits() {
        let mut m = FakeMemory::default();
        m.acs[3] = Word::from_halves(0o1, 0o777_776);
        let ea = resolve(&mut m, move_inst(false, 3, 5), 0, false).expect("no fault");
        assert_eq!(ea.address, va(0, 3));
        assert!(!ea.global);
        assert_eq!(ea.flag_word, m.acs[3]);
    }

    #[test]
    fn flat_indirection_chain() {
        let mut m = FakeMemory::with(&[
            (va(0, 0o100), ifiw(true, 0, 0o200)),
            (va(0, 0o200), ifiw(false, 2, 0o300)),
        ]);
        m.acs[2] = Word::from(4_u32);
        let ea = resolve(&mut m, move_inst(true, 0, 0o100), 0, false).expect("no fault");
        assert_eq!(ea.address, va(0, 0o304));
        assert_eq!(m.fetches, vec![va(0, 0o100), va(0, 0o200)]);
    }

    #[test]
    fn first_hop_always_completes() {
        let mut m = FakeMemory::with(&[(va(0, 0o100), ifiw(false, 0, 0o200))]);
        m.attention = true;
        let ea = resolve(&mut m, move_inst(true, 0, 0o100), 0, false).expect("one hop is allowed");
        assert_eq!(ea.address, va(0, 0o200));
    }

    #[test]
    fn second_hop_is_never_started_once_attention_is_needed() {
        // An infinite chain: 100 points at itself.
        let mut m = FakeMemory::with(&[(va(0, 0o100), ifiw(true, 0, 0o100))]);
        m.attention = true;
        for extended in [false, true] {
            m.fetches.clear();
            assert_eq!(
                resolve(&mut m, move_inst(true, 0, 0o100), 0, extended),
                Err(Abort::Interrupted)
            );
            assert_eq!(m.fetches.len(), 1);
        }
    }

    #[test]
    fn extended_local_and_global_indexing() {
        let mut m = FakeMemory::default();
        // Section number in the index register: global.
        m.acs[1] = Word::from_halves(0o3, 0o10);
        let ea = resolve(&mut m, move_inst(false, 1, 0o777_777), 2, true).expect("no fault");
        assert_eq!(ea.address, va(3, 0o7));
        assert!(ea.global);
        // No section number: local, wrapping within the section.
        m.acs[1] = Word::from_halves(0, 0o10);
        let ea = resolve(&mut m, move_inst(false, 1, 0o777_777), 2, true).expect("no fault");
        assert_eq!(ea.address, va(2, 0o7));
        assert!(!ea.global);
        // Negative index register: local.
        m.acs[1] = Word::from_halves(0o777_770, 0o10);
        let ea = resolve(&mut m, move_inst(false, 1, 0o100), 2, true).expect("no fault");
        assert_eq!(ea.address, va(2, 0o110));
        // Section 0: always local.
        m.acs[1] = Word::from_halves(0o3, 0o10);
        let ea = resolve(&mut m, move_inst(false, 1, 0o100), 0, true).expect("no fault");
        assert_eq!(ea.address, va(0, 0o110));
    }

    #[test]
    fn extended_indirect_word_formats() {
        // EFIW in section 1 pointing at 5,,1234 with no further
        // indirection.
        let efiw = Word::from_halves(0o000_005, 0o1234);
        // IFIW (bits 0-1 = 10) in section 5, local to section 5.
        let local_ifiw = Word::new(0o400_000_000_000) | ifiw(false, 0, 0o4321);
        let mut m = FakeMemory::with(&[
            (va(1, 0o100), efiw),
            (va(5, 0o200), local_ifiw),
            (va(5, 0o300), Word::new(0o600_000_000_000)),
        ]);
        let ea = resolve(&mut m, move_inst(true, 0, 0o100), 1, true).expect("no fault");
        assert_eq!(ea.address, va(5, 0o1234));
        assert!(ea.global);
        let ea = resolve(&mut m, move_inst(true, 0, 0o200), 5, true).expect("no fault");
        assert_eq!(ea.address, va(5, 0o4321));
        assert!(!ea.global);
        let e = resolve(&mut m, move_inst(true, 0, 0o300), 5, true);
        assert!(matches!(
            e,
            Err(Abort::PageFail(PageFailure {
                cause: PageFailureCause::IllegalIndirect,
                ..
            }))
        ));
    }

    #[test]
    fn ac_references() {
        assert!(Ea::local(va(3, 0o17)).is_ac());
        let global = |section| Ea {
            address: va(section, 5),
            global: true,
            flag_word: Word::ZERO,
        };
        assert!(global(1).is_ac());
        assert!(!global(2).is_ac());
    }
}
