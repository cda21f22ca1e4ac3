//! This module holds the processor context in which instructions
//! execute: the program counter and PC flags, the accumulator
//! blocks, and the (possibly nested) execution modes.
//!
//! ## PC flags
//!
//! The flags occupy the left half of a "PC word" (flags,,PC).
//!
//! | Bit | LH mask  | Name   | Meaning |
//! | --- | -------- | ------ | ------- |
//! | 0   | 400000   | AROV   | arithmetic overflow (PCP in exec mode) |
//! | 1   | 200000   | CRY0   | carry out of bit 0 |
//! | 2   | 100000   | CRY1   | carry out of bit 1 |
//! | 3   | 040000   | FOV    | floating overflow |
//! | 4   | 020000   | FPD    | first part done |
//! | 5   | 010000   | USER   | user mode |
//! | 6   | 004000   | USERIO | user I/O (PCU in exec mode) |
//! | 7   | 002000   | PUBLIC | public mode |
//! | 8   | 001000   | AFI    | address failure inhibit |
//! | 9   | 000400   | TRAP2  | trap 2 (stack overflow) |
//! | 10  | 000200   | TRAP1  | trap 1 (arithmetic overflow) |
//! | 11  | 000100   | FXU    | floating exponent underflow |
//! | 12  | 000040   | DIV    | no divide |
//!
//! ## Nested modes
//!
//! Several things change the context for the duration of a single
//! instruction: PXCT (previous-context execute), XCT chains, the
//! execution of a trap instruction, the execution of an interrupt
//! vector instruction, and address-failure-inhibit.  When an
//! instruction is aborted, each of these is undone by its own hook.
//! The hooks are independent and idempotent, so the order in which
//! they are run does not matter, and running a hook for a mode which
//! is not in effect does nothing.
use std::fmt::{self, Debug, Formatter};

use serde::Serialize;

use base::prelude::*;

/// The two virtual address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AddressSpace {
    Exec,
    User,
}

/// The phase of instruction execution on whose behalf a memory
/// reference is made.  PXCT can redirect effective-address
/// calculation and data references (separately) to the previous
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Fetch,
    AddressCalculation,
    Data,
}

/// PXCT AC bit selecting previous context for the effective address
/// calculation.
pub const PXCT_EA: u8 = 0o10;
/// PXCT AC bit selecting previous context for data references.
pub const PXCT_DATA: u8 = 0o04;

#[derive(Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PcFlags(u32);

impl PcFlags {
    pub const AROV: PcFlags = PcFlags(0o400_000);
    /// Previous context public (exec mode meaning of AROV).
    pub const PCP: PcFlags = PcFlags(0o400_000);
    pub const CRY0: PcFlags = PcFlags(0o200_000);
    pub const CRY1: PcFlags = PcFlags(0o100_000);
    pub const FOV: PcFlags = PcFlags(0o040_000);
    pub const FPD: PcFlags = PcFlags(0o020_000);
    pub const USER: PcFlags = PcFlags(0o010_000);
    pub const USERIO: PcFlags = PcFlags(0o004_000);
    /// Previous context user (exec mode meaning of USERIO).
    pub const PCU: PcFlags = PcFlags(0o004_000);
    pub const PUBLIC: PcFlags = PcFlags(0o002_000);
    pub const AFI: PcFlags = PcFlags(0o001_000);
    pub const TRAP2: PcFlags = PcFlags(0o000_400);
    pub const TRAP1: PcFlags = PcFlags(0o000_200);
    pub const FXU: PcFlags = PcFlags(0o000_100);
    pub const DIV: PcFlags = PcFlags(0o000_040);

    pub const EMPTY: PcFlags = PcFlags(0);
    pub const ALL: PcFlags = PcFlags(0o777_740);
    pub const TRAPS: PcFlags = PcFlags(0o000_600);

    const NAMES: [(PcFlags, &'static str); 13] = [
        (PcFlags::AROV, "AROV"),
        (PcFlags::CRY0, "CRY0"),
        (PcFlags::CRY1, "CRY1"),
        (PcFlags::FOV, "FOV"),
        (PcFlags::FPD, "FPD"),
        (PcFlags::USER, "USER"),
        (PcFlags::USERIO, "USERIO"),
        (PcFlags::PUBLIC, "PUBLIC"),
        (PcFlags::AFI, "AFI"),
        (PcFlags::TRAP2, "TRAP2"),
        (PcFlags::TRAP1, "TRAP1"),
        (PcFlags::FXU, "FXU"),
        (PcFlags::DIV, "DIV"),
    ];

    /// Build a flag set from left-half bits; bits which are not flags
    /// are discarded.
    pub const fn from_bits(lh: u32) -> PcFlags {
        PcFlags(lh & PcFlags::ALL.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: PcFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: PcFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: PcFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PcFlags) {
        self.0 &= !other.0;
    }

    pub const fn union(self, other: PcFlags) -> PcFlags {
        PcFlags(self.0 | other.0)
    }

    pub const fn without(self, other: PcFlags) -> PcFlags {
        PcFlags(self.0 & !other.0)
    }

    pub const fn is_user(self) -> bool {
        self.contains(PcFlags::USER)
    }
}

impl Debug for PcFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let mut first = true;
        f.write_str("PcFlags(")?;
        for (flag, name) in PcFlags::NAMES.iter() {
            if self.contains(*flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str(")")
    }
}

/// The state the instruction loop reads and writes on every
/// instruction.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    pub pc: VirtualAddress,
    pub flags: PcFlags,
    /// A trap (TRAP1/TRAP2) is waiting to be taken at the next
    /// instruction boundary.
    pub trap_pending: bool,
    /// Section from which the current instruction was fetched; this
    /// is the default section for its effective address.
    pub fetched_section: u32,
    acs: [[Word; 16]; 8],
    current_block: u8,
    previous_block: u8,
    /// AC field of the PXCT instruction in effect (zero when none).
    pub(crate) pxct: u8,
    pub(crate) xct_depth: u8,
    pub(crate) trap_in_progress: bool,
    pub(crate) vector_in_progress: bool,
    /// Address failure inhibit: set for the one instruction which
    /// proceeds over a breakpoint.
    pub(crate) one_proceed: bool,
    pub(crate) space_override: Option<AddressSpace>,
    pub(crate) last_instruction: Instruction,
}

impl Default for ProcessorContext {
    fn default() -> Self {
        ProcessorContext {
            pc: VirtualAddress::ZERO,
            flags: PcFlags::EMPTY,
            trap_pending: false,
            fetched_section: 0,
            acs: [[Word::ZERO; 16]; 8],
            current_block: 0,
            previous_block: 0,
            pxct: 0,
            xct_depth: 0,
            trap_in_progress: false,
            vector_in_progress: false,
            one_proceed: false,
            space_override: None,
            last_instruction: Instruction::new(Word::ZERO),
        }
    }
}

impl ProcessorContext {
    pub fn new() -> ProcessorContext {
        ProcessorContext::default()
    }

    pub fn ac(&self, n: u8) -> Word {
        self.acs[usize::from(self.current_block)][usize::from(n & 0o17)]
    }

    pub fn set_ac(&mut self, n: u8, value: Word) {
        self.acs[usize::from(self.current_block)][usize::from(n & 0o17)] = value;
    }

    pub fn ac_in_block(&self, block: u8, n: u8) -> Word {
        self.acs[usize::from(block & 7)][usize::from(n & 0o17)]
    }

    pub fn set_ac_in_block(&mut self, block: u8, n: u8, value: Word) {
        self.acs[usize::from(block & 7)][usize::from(n & 0o17)] = value;
    }

    pub fn current_block(&self) -> u8 {
        self.current_block
    }

    pub fn previous_block(&self) -> u8 {
        self.previous_block
    }

    pub fn select_ac_blocks(&mut self, current: u8, previous: u8) {
        self.current_block = current & 7;
        self.previous_block = previous & 7;
    }

    pub fn is_user(&self) -> bool {
        self.flags.is_user()
    }

    /// The address space of the current context.
    pub fn current_space(&self) -> AddressSpace {
        match self.space_override {
            Some(space) => space,
            None if self.flags.is_user() => AddressSpace::User,
            None => AddressSpace::Exec,
        }
    }

    /// The address space of the previous context.  Only meaningful in
    /// exec mode, where PCU says whether the previous context was a
    /// user program.
    pub fn previous_space(&self) -> AddressSpace {
        if self.flags.contains(PcFlags::PCU) {
            AddressSpace::User
        } else {
            AddressSpace::Exec
        }
    }

    /// The address space and AC block used for a reference made in
    /// the given phase of the current instruction.
    pub fn context_for(&self, phase: Phase) -> (AddressSpace, u8) {
        let previous = match phase {
            Phase::Fetch => false,
            Phase::AddressCalculation => self.pxct & PXCT_EA != 0,
            Phase::Data => self.pxct & PXCT_DATA != 0,
        };
        if previous {
            (self.previous_space(), self.previous_block)
        } else {
            (self.current_space(), self.current_block)
        }
    }

    /// The PC word saved by JSR, JSP, PUSHJ and friends.  Outside
    /// section zero on the extended processor, this is the 30-bit PC
    /// with no flags.
    pub fn pc_word(&self, pc: VirtualAddress, extended: bool) -> Word {
        if extended && pc.section() != 0 {
            Word::from(pc.bits())
        } else {
            Word::from_halves(self.flags.bits(), pc.offset())
        }
    }

    /// Flags and the in-section PC, as stored in the first word of an
    /// XPCW block or the MUUO flag word.
    pub fn flags_word(&self) -> Word {
        Word::from_halves(self.flags.bits(), 0)
    }

    /// Set the trap flags; the trap is delivered at the next
    /// instruction boundary if trapping is enabled.
    pub fn raise_trap_flags(&mut self, traps: PcFlags, trapping_enabled: bool) {
        let traps = PcFlags::from_bits(traps.bits() & PcFlags::TRAPS.bits());
        self.flags.insert(traps);
        if trapping_enabled && self.flags.intersects(PcFlags::TRAPS) {
            self.trap_pending = true;
        }
    }

    pub fn undo_pxct(&mut self) {
        self.pxct = 0;
    }

    pub fn undo_xct(&mut self) {
        self.xct_depth = 0;
    }

    pub fn undo_trap(&mut self) {
        self.trap_in_progress = false;
    }

    pub fn undo_vector(&mut self) {
        self.vector_in_progress = false;
    }

    pub fn undo_one_proceed(&mut self) {
        self.one_proceed = false;
    }

    pub fn undo_space_override(&mut self) {
        self.space_override = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_aliases_share_bits() {
        assert_eq!(PcFlags::PCP, PcFlags::AROV);
        assert_eq!(PcFlags::PCU, PcFlags::USERIO);
        assert_eq!(PcFlags::from_bits(0o777_777).bits(), 0o777_740);
        assert_eq!(
            format!("{:?}", PcFlags::USER.union(PcFlags::TRAP1)),
            "PcFlags(USER|TRAP1)"
        );
    }

    #[test]
    fn pxct_selects_previous_context_per_phase() {
        let mut ctx = ProcessorContext::new();
        ctx.select_ac_blocks(1, 3);
        ctx.flags.insert(PcFlags::PCU);
        ctx.pxct = PXCT_DATA;
        assert_eq!(ctx.context_for(Phase::Fetch), (AddressSpace::Exec, 1));
        assert_eq!(
            ctx.context_for(Phase::AddressCalculation),
            (AddressSpace::Exec, 1)
        );
        assert_eq!(ctx.context_for(Phase::Data), (AddressSpace::User, 3));
        ctx.undo_pxct();
        ctx.undo_pxct();
        assert_eq!(ctx.context_for(Phase::Data), (AddressSpace::Exec, 1));
    }

    #[test]
    fn ac_blocks_are_separate() {
        let mut ctx = ProcessorContext::new();
        ctx.set_ac(5, Word::ONE);
        ctx.select_ac_blocks(2, 0);
        assert_eq!(ctx.ac(5), Word::ZERO);
        assert_eq!(ctx.ac_in_block(0, 5), Word::ONE);
    }

    #[test]
    fn pc_word_format_depends_on_section() {
        let mut ctx = ProcessorContext::new();
        ctx.flags.insert(PcFlags::CRY0);
        assert_eq!(
            ctx.pc_word(VirtualAddress::new(0, 0o1234), true),
            Word::from_halves(0o200_000, 0o1234)
        );
        assert_eq!(
            ctx.pc_word(VirtualAddress::new(2, 0o1234), true),
            Word::from_halves(2, 0o1234)
        );
        assert_eq!(
            ctx.pc_word(VirtualAddress::new(2, 0o1234), false),
            Word::from_halves(0o200_000, 0o1234)
        );
    }
}
