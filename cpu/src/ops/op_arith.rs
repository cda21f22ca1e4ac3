use base::prelude::*;

use crate::abort::Abort;
use crate::ea::Ea;
use crate::kn10::Kn10;

use super::{condition_holds, Mode, PcInc};

/// ## Arithmetic, comparison and skip instructions
///
/// The low three bits of the compare, jump and skip families select
/// the condition (never, L, E, LE, always, GE, N, G).
impl Kn10 {
    fn add_like(
        &mut self,
        inst: Instruction,
        ea: Ea,
        f: fn(Word, Word) -> AddOutcome,
    ) -> Result<PcInc, Abort> {
        let ac = inst.ac();
        let a = self.ac(ac);
        let m = match Mode::of(inst) {
            Mode::Immediate => self.immediate(ea),
            _ => self.read_data(ea)?,
        };
        let outcome = f(a, m);
        match Mode::of(inst) {
            Mode::Basic | Mode::Immediate => self.set_ac(ac, outcome.value),
            Mode::Memory => self.write_data(ea, outcome.value)?,
            Mode::Both => {
                self.write_data(ea, outcome.value)?;
                self.set_ac(ac, outcome.value);
            }
        }
        // Flags only change once the result has been stored.
        self.set_arith_flags(outcome);
        Ok(PcInc::Next)
    }

    pub(crate) fn op_add(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.add_like(inst, ea, Word::add)
    }

    pub(crate) fn op_sub(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.add_like(inst, ea, Word::sub)
    }

    /// CAI: compare AC with `0,,E`.
    pub(crate) fn op_cai(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let a = self.ac(inst.ac());
        Ok(PcInc::skip_if(condition_holds(inst, a, self.immediate(ea))))
    }

    /// CAM: compare AC with C(E).
    pub(crate) fn op_cam(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let m = self.read_data(ea)?;
        let a = self.ac(inst.ac());
        Ok(PcInc::skip_if(condition_holds(inst, a, m)))
    }

    /// JUMP: jump if AC satisfies the condition.
    pub(crate) fn op_jump(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let a = self.ac(inst.ac());
        if condition_holds(inst, a, Word::ZERO) {
            Ok(self.jump_to(ea.address))
        } else {
            Ok(PcInc::Next)
        }
    }

    /// SKIP: skip if C(E) satisfies the condition; load it into a
    /// non-zero AC.
    pub(crate) fn op_skip(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let m = self.read_data(ea)?;
        if inst.ac() != 0 {
            self.set_ac(inst.ac(), m);
        }
        Ok(PcInc::skip_if(condition_holds(inst, m, Word::ZERO)))
    }

    fn step_and_jump(&mut self, inst: Instruction, ea: Ea, delta: Word) -> Result<PcInc, Abort> {
        let outcome = self.ac(inst.ac()).add(delta);
        self.set_ac(inst.ac(), outcome.value);
        self.set_arith_flags(outcome);
        if condition_holds(inst, outcome.value, Word::ZERO) {
            Ok(self.jump_to(ea.address))
        } else {
            Ok(PcInc::Next)
        }
    }

    fn step_and_skip(&mut self, inst: Instruction, ea: Ea, delta: Word) -> Result<PcInc, Abort> {
        let outcome = self.read_data(ea)?.add(delta);
        self.write_data(ea, outcome.value)?;
        if inst.ac() != 0 {
            self.set_ac(inst.ac(), outcome.value);
        }
        self.set_arith_flags(outcome);
        Ok(PcInc::skip_if(condition_holds(
            inst,
            outcome.value,
            Word::ZERO,
        )))
    }

    pub(crate) fn op_aoj(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.step_and_jump(inst, ea, Word::ONE)
    }

    pub(crate) fn op_soj(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.step_and_jump(inst, ea, Word::MAX)
    }

    pub(crate) fn op_aos(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.step_and_skip(inst, ea, Word::ONE)
    }

    pub(crate) fn op_sos(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.step_and_skip(inst, ea, Word::MAX)
    }

    /// AOBJP and AOBJN add one to each half of AC (with no carry
    /// between the halves) and jump if the result is positive or
    /// negative respectively.
    pub(crate) fn op_aobj(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let a = self.ac(inst.ac());
        let new = Word::from_halves(half_add(a.lh(), 1), half_add(a.rh(), 1));
        self.set_ac(inst.ac(), new);
        let jump = if inst.opcode() == opcodes::AOBJN {
            new.is_negative()
        } else {
            !new.is_negative()
        };
        if jump {
            Ok(self.jump_to(ea.address))
        } else {
            Ok(PcInc::Next)
        }
    }
}
