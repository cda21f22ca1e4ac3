//! Delivery of interrupts, traps, page failures and UUOs.
//!
//! Interrupts and traps are delivered by executing a single *vector
//! instruction* held in the process tables:
//!
//! | Source | Location |
//! | ------ | -------- |
//! | PI channel n | EPT + 040 + 2n |
//! | Unibus adapter k, device vector v | C(EPT + 0100 + k) + v/4 |
//! | Trap 1, 2, 3 | UPT + 421, 422, 423 |
//! | LUUO | 41 in the current address space |
//!
//! The vector instruction must be JSR or XPCW (`JRST 7,`).  A vector
//! instruction of any other kind, or a page failure while executing
//! one, means the machine is hopelessly confused and is a
//! [`Bugcheck`].  LUUO is the exception: a page failure while running
//! location 41 is an ordinary page failure.
//!
//! MUUOs and page failures don't execute an instruction; they save
//! the machine state in the UPT and load a new PC word from it:
//!
//! | UPT offset | MUUO | Page failure (flat) | Page failure (extended) |
//! | ---------- | ---- | ------------------- | ----------------------- |
//! | 424 / 500  | flags,,opcode/AC/I/X | page-fail word | page-fail word |
//! | 425 / 501  | PC of the next instruction | flags,,PC | flags |
//! | 426 / 502  | E | new PC word | PC |
//! | 427 / 503  | process context | | new PC word |
//! | 430-437    | new PC words | | |
use tracing::{event, Level};

use base::prelude::*;

use super::abort::{Abort, Bugcheck, PageFailure};
use super::apr::AprFlag;
use super::bus::InterruptSource;
use super::context::{AddressSpace, PcFlags};
use super::ea::Ea;
use super::kn10::Kn10;
use super::ops::PcInc;
use super::pi::channel_bit;

const EPT_INTERRUPT_BASE: u32 = 0o040;
const EPT_ADAPTER_VECTOR_BASE: u32 = 0o100;
const UPT_TRAP_BASE: u32 = 0o420;
const UPT_MUUO_FLAGS: u32 = 0o424;
const UPT_MUUO_PC: u32 = 0o425;
const UPT_MUUO_E: u32 = 0o426;
const UPT_MUUO_CONTEXT: u32 = 0o427;
const UPT_MUUO_NEW_PC: u32 = 0o430;
const UPT_PAGE_FAIL_WORD: u32 = 0o500;
const LUUO_STORE: u32 = 0o40;
const LUUO_VECTOR: u32 = 0o41;

/// The flags which JSR clears when executed as a vector instruction.
const VECTOR_CLEARS: PcFlags = PcFlags::FPD.union(PcFlags::AFI).union(PcFlags::TRAPS);

/// The extended PC is 23 bits (a 5-bit section number).
const EXTENDED_PC_MASK: u32 = 0o37_777_777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VectorKind {
    Interrupt,
    Trap,
    Luuo,
}

impl VectorKind {
    fn enters_exec_mode(self) -> bool {
        self == VectorKind::Interrupt
    }
}

/// The process context word (DATAI PAG and MUUO): the AC block
/// selections in bits 6-11 and the UPT page in the right half.
pub(crate) fn process_context_word(current: u8, previous: u8, upt_page: u32) -> Word {
    Word::from_halves(
        0o400_000 | (u32::from(current) << 9) | (u32::from(previous) << 6),
        upt_page,
    )
}

impl Kn10 {
    /// Interpret a new PC word.
    pub(crate) fn pc_from_word(&self, w: Word) -> VirtualAddress {
        if self.extended {
            VirtualAddress::from_bits((w.bits() as u32) & EXTENDED_PC_MASK)
        } else {
            VirtualAddress::new(0, w.rh())
        }
    }

    /// Unwind every nested mode after an instruction has been
    /// abandoned.  Each undo is idempotent, so they are all done every
    /// time.
    pub(crate) fn unwind_modes(&mut self) {
        self.cpu.undo_pxct();
        self.cpu.undo_xct();
        self.cpu.undo_trap();
        self.cpu.undo_one_proceed();
        self.cpu.undo_vector();
        self.cpu.undo_space_override();
    }

    /// Execute the vector instruction at `location`.  `return_pc` is
    /// the PC saved by the vector instruction.
    pub(crate) fn exec_vector(
        &mut self,
        location: PhysicalAddress,
        kind: VectorKind,
        return_pc: VirtualAddress,
    ) -> Result<(), Abort> {
        let word = match self.read_table(location) {
            Ok(w) => w,
            Err(failure) => return Err(self.vector_fault(location, kind, failure)),
        };
        let inst = Instruction::new(word);
        let is_jsr = inst.opcode() == opcodes::JSR;
        let is_xpcw = inst.opcode() == opcodes::JRST && inst.ac() == 0o7;
        if !(is_jsr || is_xpcw) {
            return Err(Bugcheck::IllegalVectorInstruction {
                location,
                instruction: inst,
            }
            .into());
        }
        event!(
            Level::TRACE,
            "{:?} vector at {} is {}",
            kind,
            location,
            inst
        );
        self.cpu.vector_in_progress = true;
        if kind.enters_exec_mode() {
            self.cpu.space_override = Some(AddressSpace::Exec);
        }
        let result = if is_jsr {
            self.vector_jsr(inst, kind, return_pc)
        } else {
            self.vector_xpcw(inst, kind, return_pc)
        };
        self.cpu.undo_vector();
        self.cpu.undo_space_override();
        match result {
            Err(Abort::PageFail(failure)) => Err(self.vector_fault(location, kind, failure)),
            other => other,
        }
    }

    fn vector_fault(
        &self,
        location: PhysicalAddress,
        kind: VectorKind,
        failure: PageFailure,
    ) -> Abort {
        match kind {
            VectorKind::Luuo => Abort::PageFail(failure),
            VectorKind::Interrupt | VectorKind::Trap => {
                Abort::Fatal(Bugcheck::FaultInVector { location, failure })
            }
        }
    }

    fn vector_ea(&mut self, inst: Instruction) -> Result<Ea, Abort> {
        // The vector instruction is relative to the section of the
        // current PC, not the section of the interrupted instruction.
        let section = self.cpu.pc.section();
        self.resolve_without_polling(inst, section)
    }

    fn vector_jsr(
        &mut self,
        inst: Instruction,
        kind: VectorKind,
        return_pc: VirtualAddress,
    ) -> Result<(), Abort> {
        let ea = self.vector_ea(inst)?;
        let was_user = self.cpu.is_user();
        let saved = self.cpu.pc_word(return_pc, self.extended);
        self.write_data(ea, saved)?;
        let mut flags = self.cpu.flags.without(VECTOR_CLEARS);
        if kind.enters_exec_mode() {
            flags.remove(PcFlags::USER.union(PcFlags::PUBLIC).union(PcFlags::PCU));
            if was_user {
                flags.insert(PcFlags::PCU);
            }
        }
        self.cpu.flags = flags;
        self.cpu.pc = ea.plus(1).address;
        Ok(())
    }

    fn vector_xpcw(
        &mut self,
        inst: Instruction,
        kind: VectorKind,
        return_pc: VirtualAddress,
    ) -> Result<(), Abort> {
        let ea = self.vector_ea(inst)?;
        let was_user = self.cpu.is_user();
        self.write_data(ea, self.cpu.flags_word())?;
        self.write_data(ea.plus(1), Word::from(return_pc.bits()))?;
        let new_flags = self.read_data(ea.plus(2))?;
        let new_pc = self.read_data(ea.plus(3))?;
        let mut flags = PcFlags::from_bits(new_flags.lh() & PcFlags::ALL.bits());
        if kind.enters_exec_mode() && was_user {
            flags.insert(PcFlags::PCU);
        }
        self.cpu.flags = flags;
        self.cpu.pc = self.pc_from_word(new_pc);
        Ok(())
    }

    /// Take an interrupt on `channel`, which the PI system has just
    /// selected.
    pub(crate) fn take_interrupt(&mut self, channel: u8) -> Result<(), Bugcheck> {
        let standard = self
            .mem
            .ept_address(EPT_INTERRUPT_BASE + 2 * u32::from(channel));
        let bit = channel_bit(channel);
        let location = match self.bus.interrupt_source(channel) {
            Some(InterruptSource::Unibus { adapter, device }) => {
                let vector = self
                    .with_device(device, |d, ctx| d.interrupt_vector(ctx))
                    .unwrap_or(0);
                if vector == 0 {
                    standard
                } else {
                    self.adapter_vector_location(adapter, vector)?
                }
            }
            Some(InterruptSource::IoBus { device }) => {
                self.with_device(device, |d, ctx| d.interrupt_vector(ctx));
                standard
            }
            None if self.clock.request_mask() & bit != 0 => standard,
            None if (self.pi.requesting() & !self.pi.device_requests()) & bit != 0 => standard,
            None => return Err(Bugcheck::UnattributedInterrupt { channel }),
        };
        event!(
            Level::DEBUG,
            "interrupt on channel {} through {}",
            channel,
            location
        );
        self.pi.begin(channel);
        self.pi_devupd();
        let pc = self.cpu.pc;
        self.exec_vector(location, VectorKind::Interrupt, pc)
            .map_err(into_bugcheck)
    }

    fn adapter_vector_location(
        &mut self,
        adapter: u8,
        vector: u32,
    ) -> Result<PhysicalAddress, Bugcheck> {
        let table = self
            .mem
            .ept_address(EPT_ADAPTER_VECTOR_BASE + u32::from(adapter));
        let base = self
            .read_table(table)
            .map_err(|failure| Bugcheck::FaultInVector {
                location: table,
                failure,
            })?;
        let address = VirtualAddress::new(0, base.rh().wrapping_add(vector / 4) & HALF_MASK);
        self.mem
            .translate(AddressSpace::Exec, address, false)
            .map_err(|failure| Bugcheck::FaultInVector {
                location: table,
                failure,
            })
    }

    /// Take a pending arithmetic or pushdown trap.
    pub(crate) fn take_trap(&mut self) -> Result<(), Bugcheck> {
        let mut n = 0;
        if self.cpu.flags.contains(PcFlags::TRAP1) {
            n |= 1;
        }
        if self.cpu.flags.contains(PcFlags::TRAP2) {
            n |= 2;
        }
        self.cpu.trap_pending = false;
        if n == 0 {
            return Ok(());
        }
        self.cpu.flags.remove(PcFlags::TRAPS);
        let location = self.mem.upt_address(UPT_TRAP_BASE + n);
        event!(Level::DEBUG, "trap {} through {}", n, location);
        self.cpu.trap_in_progress = true;
        let pc = self.cpu.pc;
        let result = self.exec_vector(location, VectorKind::Trap, pc);
        self.cpu.undo_trap();
        result.map_err(into_bugcheck)
    }

    /// Deliver a page failure.  The PC saved is the PC of the
    /// instruction which failed.
    pub(crate) fn deliver_page_fail(&mut self, failure: PageFailure) -> Result<(), Bugcheck> {
        event!(Level::DEBUG, "page failure at PC {}: {}", self.cpu.pc, failure);
        if failure.is_non_existent_memory() {
            self.apr.set_flag(AprFlag::NonExistentMemory);
            self.apr_update();
        }
        let pc = self.cpu.pc;
        let was_user = self.cpu.is_user();
        let at = |kn10: &Kn10, offset: u32| kn10.mem.upt_address(UPT_PAGE_FAIL_WORD + offset);
        let fault = |location: PhysicalAddress| {
            move |failure: PageFailure| Bugcheck::FaultInVector { location, failure }
        };
        let a = at(self, 0);
        self.write_table(a, failure.word()).map_err(fault(a))?;
        let new_pc_word = if self.extended {
            let (a1, a2, a3) = (at(self, 1), at(self, 2), at(self, 3));
            self.write_table(a1, self.cpu.flags_word())
                .map_err(fault(a1))?;
            self.write_table(a2, Word::from(pc.bits()))
                .map_err(fault(a2))?;
            self.read_table(a3).map_err(fault(a3))?
        } else {
            let (a1, a2) = (at(self, 1), at(self, 2));
            self.write_table(a1, self.cpu.pc_word(pc, false))
                .map_err(fault(a1))?;
            self.read_table(a2).map_err(fault(a2))?
        };
        let mut flags = if self.extended {
            PcFlags::EMPTY
        } else {
            PcFlags::from_bits(new_pc_word.lh() & PcFlags::ALL.bits())
        };
        if was_user {
            flags.insert(PcFlags::PCU);
        }
        self.cpu.flags = flags;
        self.cpu.pc = self.pc_from_word(new_pc_word);
        Ok(())
    }

    /// Monitor UUO: an instruction the hardware does not implement, or
    /// one the current mode may not execute.
    pub(crate) fn muuo(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let was_user = self.cpu.is_user();
        let trapping = self.cpu.flags.intersects(PcFlags::TRAPS);
        let next = self.cpu.pc.successor();
        event!(
            Level::DEBUG,
            "MUUO {} at {} (E={})",
            inst,
            self.cpu.pc,
            ea.address
        );
        let context = process_context_word(
            self.cpu.current_block(),
            self.cpu.previous_block(),
            self.mem.upt_page(),
        );
        let stores = [
            (
                UPT_MUUO_FLAGS,
                Word::from_halves(self.cpu.flags.bits(), inst.left_half()),
            ),
            (UPT_MUUO_PC, Word::from(next.bits())),
            (UPT_MUUO_E, Word::from(ea.address.bits())),
            (UPT_MUUO_CONTEXT, context),
        ];
        for (offset, value) in stores {
            let a = self.mem.upt_address(offset);
            self.write_table(a, value)?;
        }
        let mut offset = UPT_MUUO_NEW_PC;
        if was_user {
            offset += 4;
        }
        if trapping {
            offset += 1;
        }
        let new_pc_word = self.read_table(self.mem.upt_address(offset))?;
        // Extended: flags in bits 0-12 and the PC in bits 13-35.
        // Flat: flags in the left half and the PC in the right.
        let mut flags = PcFlags::from_bits(new_pc_word.lh() & PcFlags::ALL.bits());
        flags.remove(PcFlags::TRAPS);
        if was_user && !flags.is_user() {
            flags.insert(PcFlags::PCU);
        }
        self.cpu.flags = flags;
        self.cpu.trap_pending = false;
        self.cpu.pc = self.pc_from_word(new_pc_word);
        Ok(PcInc::Jumped)
    }

    /// Local UUO: store the instruction and its E at 40 and execute
    /// the instruction at 41.
    pub(crate) fn luuo(&mut self, inst: Instruction, ea: Ea) -> Result<PcInc, Abort> {
        let space = self.cpu.current_space();
        let stored = Word::from_halves(inst.left_half() & 0o777_740, ea.address.offset());
        self.write_data(Ea::local(VirtualAddress::new(0, LUUO_STORE)), stored)?;
        let location = self
            .mem
            .translate(space, VirtualAddress::new(0, LUUO_VECTOR), false)?;
        let next = self.cpu.pc.successor();
        self.exec_vector(location, VectorKind::Luuo, next)?;
        Ok(PcInc::Jumped)
    }
}

fn into_bugcheck(abort: Abort) -> Bugcheck {
    match abort {
        Abort::Fatal(bug) => bug,
        // Vector execution never polls, and its page failures are
        // already bugchecks.
        Abort::PageFail(failure) => Bugcheck::FaultInVector {
            location: PhysicalAddress::new(failure.address.bits()),
            failure,
        },
        Abort::Interrupted => Bugcheck::VectorAbandoned,
    }
}
