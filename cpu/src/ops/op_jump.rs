use tracing::{event, Level};

use base::prelude::*;

use crate::abort::Abort;
use crate::context::{PcFlags, Phase};
use crate::ea::Ea;
use crate::kn10::Kn10;

use super::op_move::CALL_CLEARS;
use super::PcInc;

/// JRST variants, selected by the AC field.
const JRST_PLAIN: u8 = 0o0;
const JRST_RESTORE_FLAGS: u8 = 0o2;
const JRST_HALT: u8 = 0o4;
const JRST_XJRSTF: u8 = 0o5;
const JRST_XJEN: u8 = 0o6;
const JRST_XPCW: u8 = 0o7;
const JRST_DISMISS: u8 = 0o10;
const JRST_JEN: u8 = 0o12;

/// ## Jumps
///
/// - JRST and its variants: [`Kn10::op_jrst`]
/// - JFCL: [`Kn10::op_jfcl`]
/// - XCT and PXCT: [`Kn10::op_xct`]
/// - JSR, JSP
impl Kn10 {
    pub(crate) fn op_jrst(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let user = self.cpu.is_user();
        match inst.ac() {
            JRST_PLAIN => Ok(self.jump_to(ea.address)),
            JRST_RESTORE_FLAGS => {
                self.restore_flags(ea.flag_word.lh());
                Ok(self.jump_to(ea.address))
            }
            JRST_HALT if !user => {
                event!(Level::INFO, "HALT at {} (new PC {})", self.cpu.pc, ea.address);
                self.halted = true;
                Ok(self.jump_to(ea.address))
            }
            JRST_XJRSTF => self.xjrstf(ea),
            JRST_XJEN if !user => {
                self.dismiss_interrupt();
                self.xjrstf(ea)
            }
            JRST_XPCW if !user => {
                let next = self.cpu.pc.successor();
                self.write_data(ea, self.cpu.flags_word())?;
                self.write_data(ea.plus(1), Word::from(next.bits()))?;
                self.xjrstf(ea.plus(2))
            }
            JRST_DISMISS if !user => {
                self.dismiss_interrupt();
                Ok(self.jump_to(ea.address))
            }
            JRST_JEN if !user => {
                self.dismiss_interrupt();
                self.restore_flags(ea.flag_word.lh());
                Ok(self.jump_to(ea.address))
            }
            _ => self.muuo(inst, ea),
        }
    }

    /// Load the flags from `lh`.  A user program can't leave user mode
    /// or give itself I/O privileges.
    fn restore_flags(&mut self, lh: u32) {
        let old = self.cpu.flags;
        let mut new = PcFlags::from_bits(lh & PcFlags::ALL.bits());
        if old.is_user() {
            new.insert(PcFlags::USER);
            if !old.contains(PcFlags::USERIO) {
                new.remove(PcFlags::USERIO);
            }
        }
        self.cpu.flags = new;
        if new.intersects(PcFlags::TRAPS) {
            self.raise_trap_flags(new);
        }
    }

    /// Flags from C(E), PC from C(E+1).
    fn xjrstf(&mut self, ea: Ea) -> Result<PcInc, Abort> {
        let flags = self.read_data(ea)?;
        let pc = self.read_data(ea.plus(1))?;
        self.restore_flags(flags.lh());
        let target = self.pc_from_word(pc);
        Ok(self.jump_to(target))
    }

    fn dismiss_interrupt(&mut self) {
        self.pi.dismiss();
        self.pi_devupd();
        self.pi_recheck();
    }

    /// JFCL: jump if any of the flags selected by AC (AROV, CRY0,
    /// CRY1, FOV) is set, clearing them.
    pub(crate) fn op_jfcl(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let selected = PcFlags::from_bits(u32::from(inst.ac()) << 14);
        if self.cpu.flags.intersects(selected) {
            self.cpu.flags.remove(selected);
            Ok(self.jump_to(ea.address))
        } else {
            Ok(PcInc::Next)
        }
    }

    /// XCT executes the instruction at E.  In exec mode a non-zero AC
    /// makes it PXCT: the AC bits select which references of the
    /// executed instruction use the previous context.
    pub(crate) fn op_xct(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let mut target_ea = ea;
        let mut pxct = if self.cpu.is_user() { 0 } else { inst.ac() };
        loop {
            let word = self.read(target_ea, Phase::Fetch)?;
            let target = Instruction::new(word);
            self.cpu.xct_depth = self.cpu.xct_depth.saturating_add(1);
            if pxct != 0 {
                self.cpu.pxct = pxct;
            }
            let section = target_ea.address.section();
            if target.opcode() == opcodes::XCT {
                // Chains of XCT poll like indirection chains do.
                let next_ea = self.resolve(target, section)?;
                if self.attention.is_raised() {
                    return Err(Abort::Interrupted);
                }
                if !self.cpu.is_user() && target.ac() != 0 {
                    pxct = target.ac();
                }
                target_ea = next_ea;
                continue;
            }
            let result = self.execute(target, section);
            self.cpu.undo_pxct();
            self.cpu.undo_xct();
            return result;
        }
    }

    /// JSR: store the PC word at E and jump to E+1.
    pub(crate) fn op_jsr(&mut self, _inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let saved = self.cpu.pc_word(self.cpu.pc.successor(), self.extended);
        self.write_data(ea, saved)?;
        self.cpu.flags.remove(CALL_CLEARS);
        Ok(self.jump_to(ea.plus(1).address))
    }

    /// JSP: store the PC word in AC and jump to E.
    pub(crate) fn op_jsp(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let saved = self.cpu.pc_word(self.cpu.pc.successor(), self.extended);
        self.set_ac(inst.ac(), saved);
        self.cpu.flags.remove(CALL_CLEARS);
        Ok(self.jump_to(ea.address))
    }
}
