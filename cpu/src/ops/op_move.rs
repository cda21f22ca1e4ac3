use base::prelude::*;

use crate::abort::Abort;
use crate::context::PcFlags;
use crate::ea::Ea;
use crate::kn10::Kn10;

use super::{Mode, PcInc};

/// The flags PUSHJ and JSR/JSP clear.
pub(crate) const CALL_CLEARS: PcFlags = PcFlags::FPD.union(PcFlags::AFI).union(PcFlags::TRAPS);

/// ## Data movement
///
/// - MOVE, MOVEI, MOVEM, MOVES: [`Kn10::op_move`]
/// - MOVS, MOVSI, MOVSM, MOVSS: [`Kn10::op_movs`]
/// - MOVN, MOVNI, MOVNM, MOVNS: [`Kn10::op_movn`]
/// - EXCH: [`Kn10::op_exch`]
/// - SETZ, SETO and their variants
/// - XMOVEI: [`Kn10::op_xmovei`]
/// - the half-word instructions HLL, HRLI, HRR, HRRI, HRRZ, HRRZI, HLRZ
/// - PUSH, POP, PUSHJ, POPJ
impl Kn10 {
    /// Apply `f` to an operand and store the result as the mode
    /// directs.  MOVES-style self modification only loads the AC when
    /// the AC field is non-zero.
    fn move_like<F>(&mut self, inst: Instruction, ea: Ea, f: F) -> Result<PcInc, Abort>
    where
        F: Fn(&mut Kn10, Word) -> Word,
    {
        let ac = inst.ac();
        match Mode::of(inst) {
            Mode::Basic => {
                let v = self.read_data(ea)?;
                let r = f(self, v);
                self.set_ac(ac, r);
            }
            Mode::Immediate => {
                let v = self.immediate(ea);
                let r = f(self, v);
                self.set_ac(ac, r);
            }
            Mode::Memory => {
                let v = self.ac(ac);
                let r = f(self, v);
                self.write_data(ea, r)?;
            }
            Mode::Both => {
                let v = self.read_data(ea)?;
                let r = f(self, v);
                self.write_data(ea, r)?;
                if ac != 0 {
                    self.set_ac(ac, r);
                }
            }
        }
        Ok(PcInc::Next)
    }

    pub(crate) fn op_move(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.move_like(inst, ea, |_, w| w)
    }

    pub(crate) fn op_movs(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.move_like(inst, ea, |_, w| w.swapped())
    }

    pub(crate) fn op_movn(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.move_like(inst, ea, |kn10, w| {
            let outcome = w.negate();
            kn10.set_arith_flags(outcome);
            outcome.value
        })
    }

    pub(crate) fn op_exch(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let m = self.read_data(ea)?;
        let a = self.ac(inst.ac());
        self.write_data(ea, a)?;
        self.set_ac(inst.ac(), m);
        Ok(PcInc::Next)
    }

    fn set_to(&mut self, inst: Instruction, ea: Ea, value: Word) -> Result<PcInc, Abort> {
        match Mode::of(inst) {
            Mode::Basic | Mode::Immediate => self.set_ac(inst.ac(), value),
            Mode::Memory => self.write_data(ea, value)?,
            Mode::Both => {
                self.write_data(ea, value)?;
                self.set_ac(inst.ac(), value);
            }
        }
        Ok(PcInc::Next)
    }

    pub(crate) fn op_setz(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.set_to(inst, ea, Word::ZERO)
    }

    pub(crate) fn op_seto(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.set_to(inst, ea, Word::MAX)
    }

    /// XMOVEI puts the full address in the AC.  A local reference to
    /// an AC outside section 0 becomes a global AC address (section
    /// 1).
    pub(crate) fn op_xmovei(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let address = if !self.extended {
            VirtualAddress::new(0, ea.address.offset())
        } else if !ea.global && ea.address.section() != 0 && ea.address.is_ac_address() {
            VirtualAddress::new(1, ea.address.offset())
        } else {
            ea.address
        };
        self.set_ac(inst.ac(), Word::from(address.bits()));
        Ok(PcInc::Next)
    }

    pub(crate) fn op_hll(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let m = self.read_data(ea)?;
        let a = self.ac(inst.ac());
        self.set_ac(inst.ac(), a.with_lh(m.lh()));
        Ok(PcInc::Next)
    }

    pub(crate) fn op_hrli(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let a = self.ac(inst.ac());
        self.set_ac(inst.ac(), a.with_lh(ea.address.offset()));
        Ok(PcInc::Next)
    }

    pub(crate) fn op_hrr(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let m = self.read_data(ea)?;
        let a = self.ac(inst.ac());
        self.set_ac(inst.ac(), a.with_rh(m.rh()));
        Ok(PcInc::Next)
    }

    pub(crate) fn op_hrri(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let a = self.ac(inst.ac());
        self.set_ac(inst.ac(), a.with_rh(ea.address.offset()));
        Ok(PcInc::Next)
    }

    pub(crate) fn op_hrrz(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let m = self.read_data(ea)?;
        self.set_ac(inst.ac(), Word::from_halves(0, m.rh()));
        Ok(PcInc::Next)
    }

    pub(crate) fn op_hrrzi(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        self.set_ac(inst.ac(), self.immediate(ea));
        Ok(PcInc::Next)
    }

    pub(crate) fn op_hlrz(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let m = self.read_data(ea)?;
        self.set_ac(inst.ac(), Word::from_halves(0, m.lh()));
        Ok(PcInc::Next)
    }

    /// Is the stack pointer in `ac` a global (30-bit) pointer?  Only
    /// outside section 0 of the extended machine, and only when the
    /// pointer is positive with a non-zero section field.
    fn global_stack_pointer(&self, pointer: Word) -> bool {
        self.extended
            && self.cpu.pc.section() != 0
            && !pointer.is_negative()
            && pointer.lh() & 0o7777 != 0
    }

    fn stack_address(&self, pointer: Word) -> Ea {
        if self.global_stack_pointer(pointer) {
            Ea {
                address: VirtualAddress::from_word(pointer),
                global: true,
                flag_word: pointer,
            }
        } else {
            Ea {
                address: VirtualAddress::new(self.cpu.pc.section(), pointer.rh()),
                global: false,
                flag_word: pointer,
            }
        }
    }

    /// Advance the stack pointer in `ac`, returning the new pointer.
    /// A local pointer whose count reaches zero sets TRAP2.
    fn push_pointer(&mut self, ac: u8) -> Word {
        let p = self.ac(ac);
        let new = if self.global_stack_pointer(p) {
            p.wrapping_add(Word::ONE)
        } else {
            let new = Word::from_halves(half_add(p.lh(), 1), half_add(p.rh(), 1));
            if new.lh() == 0 {
                self.raise_trap_flags(PcFlags::TRAP2);
            }
            new
        };
        self.set_ac(ac, new);
        new
    }

    /// Step the stack pointer in `ac` back.  A local pointer whose
    /// count passes zero sets TRAP2.
    fn pop_pointer(&mut self, ac: u8) {
        let p = self.ac(ac);
        let new = if self.global_stack_pointer(p) {
            p.wrapping_sub(Word::ONE)
        } else {
            let new = Word::from_halves(
                half_add(p.lh(), HALF_MASK),
                half_add(p.rh(), HALF_MASK),
            );
            if new.lh() == HALF_MASK {
                self.raise_trap_flags(PcFlags::TRAP2);
            }
            new
        };
        self.set_ac(ac, new);
    }

    pub(crate) fn op_push(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let value = self.read_data(ea)?;
        let old = self.ac(inst.ac());
        let pointer = self.push_pointer(inst.ac());
        let top = self.stack_address(pointer);
        if let Err(e) = self.write_data(top, value) {
            self.set_ac(inst.ac(), old);
            return Err(e);
        }
        Ok(PcInc::Next)
    }

    pub(crate) fn op_pop(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let pointer = self.ac(inst.ac());
        let value = self.read_data(self.stack_address(pointer))?;
        self.write_data(ea, value)?;
        self.pop_pointer(inst.ac());
        Ok(PcInc::Next)
    }

    pub(crate) fn op_pushj(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let saved = self.cpu.pc_word(self.cpu.pc.successor(), self.extended);
        let old = self.ac(inst.ac());
        let pointer = self.push_pointer(inst.ac());
        let top = self.stack_address(pointer);
        if let Err(e) = self.write_data(top, saved) {
            self.set_ac(inst.ac(), old);
            return Err(e);
        }
        self.cpu.flags.remove(CALL_CLEARS);
        Ok(self.jump_to(ea.address))
    }

    pub(crate) fn op_popj(&mut self, inst: Instruction, _ea: Ea) -> Result<PcInc, Abort> {
        let pointer = self.ac(inst.ac());
        let saved = self.read_data(self.stack_address(pointer))?;
        self.pop_pointer(inst.ac());
        let target = if self.extended && self.cpu.pc.section() != 0 {
            self.pc_from_word(saved)
        } else {
            VirtualAddress::new(self.cpu.pc.section(), saved.rh())
        };
        Ok(self.jump_to(target))
    }
}
