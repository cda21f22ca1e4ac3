//! Instruction execution.
//!
//! Every opcode has an entry in [`DISPATCH`], a table of 512
//! functions indexed by the 9-bit opcode.  Each function gets the
//! instruction and its already-resolved effective address and says how
//! the PC should move on.  Opcodes with no implementation are MUUOs;
//! 001-037 are LUUOs.
//!
//! The families are implemented in submodules:
//!
//! - moves, half words, stacks: [`op_move`]
//! - arithmetic, comparisons, skips: [`op_arith`]
//! - jumps, XCT and PXCT: [`op_jump`]
//! - I/O instructions: [`op_io`]
use base::prelude::*;

use super::abort::Abort;
use super::context::PcFlags;
use super::ea::Ea;
use super::kn10::Kn10;

mod op_arith;
mod op_io;
mod op_jump;
mod op_move;


/// How the PC moves on after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcInc {
    /// The instruction loaded the PC itself.
    Jumped,
    Next,
    Skip,
}

impl PcInc {
    pub(crate) fn skip_if(condition: bool) -> PcInc {
        if condition {
            PcInc::Skip
        } else {
            PcInc::Next
        }
    }
}

pub(crate) type OpFn = fn(&mut Kn10, Instruction, Ea) -> Result<PcInc, Abort>;

const fn fill(mut table: [OpFn; 512], first: u16, count: u16, f: OpFn) -> [OpFn; 512] {
    let mut op = first as usize;
    while op < (first + count) as usize {
        table[op] = f;
        op += 1;
    }
    table
}

const fn build_dispatch() -> [OpFn; 512] {
    use opcodes::*;
    let mut t: [OpFn; 512] = [Kn10::op_muuo as OpFn; 512];
    t = fill(
        t,
        LUUO_FIRST,
        LUUO_LAST - LUUO_FIRST + 1,
        Kn10::op_luuo as OpFn,
    );
    t = fill(t, MOVE, 4, Kn10::op_move as OpFn);
    t = fill(t, MOVS, 4, Kn10::op_movs as OpFn);
    t = fill(t, MOVN, 4, Kn10::op_movn as OpFn);
    t = fill(t, EXCH, 1, Kn10::op_exch as OpFn);
    t = fill(t, AOBJP, 2, Kn10::op_aobj as OpFn);
    t = fill(t, JRST, 1, Kn10::op_jrst as OpFn);
    t = fill(t, JFCL, 1, Kn10::op_jfcl as OpFn);
    t = fill(t, XCT, 1, Kn10::op_xct as OpFn);
    t = fill(t, PUSHJ, 1, Kn10::op_pushj as OpFn);
    t = fill(t, PUSH, 1, Kn10::op_push as OpFn);
    t = fill(t, POP, 1, Kn10::op_pop as OpFn);
    t = fill(t, POPJ, 1, Kn10::op_popj as OpFn);
    t = fill(t, JSR, 1, Kn10::op_jsr as OpFn);
    t = fill(t, JSP, 1, Kn10::op_jsp as OpFn);
    t = fill(t, ADD, 4, Kn10::op_add as OpFn);
    t = fill(t, SUB, 4, Kn10::op_sub as OpFn);
    t = fill(t, CAI, 8, Kn10::op_cai as OpFn);
    t = fill(t, CAM, 8, Kn10::op_cam as OpFn);
    t = fill(t, JUMP, 8, Kn10::op_jump as OpFn);
    t = fill(t, SKIP, 8, Kn10::op_skip as OpFn);
    t = fill(t, AOJ, 8, Kn10::op_aoj as OpFn);
    t = fill(t, AOS, 8, Kn10::op_aos as OpFn);
    t = fill(t, SOJ, 8, Kn10::op_soj as OpFn);
    t = fill(t, SOS, 8, Kn10::op_sos as OpFn);
    t = fill(t, SETZ, 4, Kn10::op_setz as OpFn);
    t = fill(t, XMOVEI, 1, Kn10::op_xmovei as OpFn);
    t = fill(t, SETO, 4, Kn10::op_seto as OpFn);
    t = fill(t, HLL, 1, Kn10::op_hll as OpFn);
    t = fill(t, HRLI, 1, Kn10::op_hrli as OpFn);
    t = fill(t, HRR, 1, Kn10::op_hrr as OpFn);
    t = fill(t, HRRI, 1, Kn10::op_hrri as OpFn);
    t = fill(t, HRRZ, 1, Kn10::op_hrrz as OpFn);
    t = fill(t, HRRZI, 1, Kn10::op_hrrzi as OpFn);
    t = fill(t, HLRZ, 1, Kn10::op_hlrz as OpFn);
    t = fill(t, IO_FIRST, 0o100, Kn10::op_io as OpFn);
    t
}

pub(crate) static DISPATCH: [OpFn; 512] = build_dispatch();

/// The four variants of the arithmetic and move families, selected by
/// the low two bits of the opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// Result to AC.
    Basic,
    /// Operand is `0,,E`; result to AC.
    Immediate,
    /// Result to memory.
    Memory,
    /// Result to both.
    Both,
}

impl Mode {
    pub(crate) fn of(inst: Instruction) -> Mode {
        match inst.opcode() & 3 {
            0 => Mode::Basic,
            1 => Mode::Immediate,
            2 => Mode::Memory,
            _ => Mode::Both,
        }
    }
}

/// The skip and jump condition in the low three bits of the opcode,
/// comparing `a` with `b`.
pub(crate) fn condition_holds(inst: Instruction, a: Word, b: Word) -> bool {
    let (a, b) = (a.to_signed(), b.to_signed());
    match inst.opcode() & 7 {
        0 => false,
        1 => a < b,
        2 => a == b,
        3 => a <= b,
        4 => true,
        5 => a >= b,
        6 => a != b,
        _ => a > b,
    }
}

impl Kn10 {
    /// `0,,E` for immediate-mode instructions.
    pub(crate) fn immediate(&self, ea: Ea) -> Word {
        Word::from(ea.address.offset())
    }

    pub(crate) fn jump_to(&mut self, address: VirtualAddress) -> PcInc {
        self.cpu.pc = if self.extended {
            address
        } else {
            VirtualAddress::new(0, address.offset())
        };
        PcInc::Jumped
    }

    /// Set the carry and overflow flags for an arithmetic result.
    /// Overflow also requests trap 1.
    pub(crate) fn set_arith_flags(&mut self, outcome: AddOutcome) {
        if outcome.carry0 {
            self.cpu.flags.insert(PcFlags::CRY0);
        }
        if outcome.carry1 {
            self.cpu.flags.insert(PcFlags::CRY1);
        }
        if outcome.overflow() {
            self.cpu.flags.insert(PcFlags::AROV);
            self.raise_trap_flags(PcFlags::TRAP1);
        }
    }

    /// May the current mode use I/O instructions?
    pub(crate) fn io_allowed(&self) -> bool {
        !self.cpu.is_user() || self.cpu.flags.contains(PcFlags::USERIO)
    }

    fn op_muuo(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.muuo(inst, ea)
    }

    fn op_luuo(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.luuo(inst, ea)
    }

    /// Execute one instruction whose effective address section
    /// defaults to `section`.
    pub(crate) fn execute(&mut self, inst: Instruction, section: u32) -> Result<PcInc, Abort> {
        let ea = self.resolve(inst, section)?;
        DISPATCH[usize::from(inst.opcode())](self, inst, ea)
    }
}
