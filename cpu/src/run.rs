//! The instruction loop.
//!
//! [`Kn10::run`] picks one of four loops, monomorphised over the
//! processor variant (flat or extended) and whether debugging
//! features are wanted.  The fast loops do nothing per instruction
//! beyond the single check of [`Kn10::needs_sync`]; the debug loops
//! also stop at breakpoints, count single steps and trace.
use std::collections::BTreeSet;

use tracing::{event, span, Level};

use base::prelude::*;

use super::abort::{Abort, Bugcheck};
use super::config::TickModel;
use super::context::{AddressSpace, Phase};
use super::diagnostics::{CurrentInstructionDiagnostics, DiagnosticFetcher};
use super::ea::Ea;
use super::kn10::Kn10;
use super::ops::{PcInc, DISPATCH};

/// Why [`Kn10::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The processor executed HALT.
    Halted,
    /// The PC reached a breakpoint (the instruction there has not been
    /// executed).
    Breakpoint(VirtualAddress),
    /// The requested number of single steps has been executed.
    StepLimit,
    /// `run` was given an instruction limit and it has been reached.
    InstructionLimit,
    /// The guest is waiting for an interrupt (it jumped to itself with
    /// the PI system on).  Only reported under the host interrupt tick
    /// model.
    Idle,
}

#[derive(Debug, Clone, Copy)]
struct CachedPage {
    generation: u64,
    space: AddressSpace,
    virtual_page: u32,
    physical_page: u32,
}

/// The most recently translated instruction page.  Entries are
/// tagged with the memory's mapping generation, so any mapping change
/// makes them stale.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct FetchCache {
    page: Option<CachedPage>,
}

impl FetchCache {
    fn lookup(&self, generation: u64, space: AddressSpace, virtual_page: u32) -> Option<u32> {
        match self.page {
            Some(p)
                if p.generation == generation
                    && p.space == space
                    && p.virtual_page == virtual_page =>
            {
                Some(p.physical_page)
            }
            _ => None,
        }
    }

    fn store(&mut self, generation: u64, space: AddressSpace, virtual_page: u32, physical_page: u32) {
        self.page = Some(CachedPage {
            generation,
            space,
            virtual_page,
            physical_page,
        });
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct DebugState {
    breakpoints: BTreeSet<VirtualAddress>,
    trace: bool,
    steps_remaining: Option<u64>,
}

impl DebugState {
    fn is_active(&self) -> bool {
        self.trace || self.steps_remaining.is_some() || !self.breakpoints.is_empty()
    }
}

impl DiagnosticFetcher for &Kn10 {
    fn diagnostics(self) -> CurrentInstructionDiagnostics {
        CurrentInstructionDiagnostics {
            current_instruction: self.cpu.last_instruction,
            instruction_address: self.cpu.pc,
        }
    }
}

impl Kn10 {
    pub fn set_breakpoint(&mut self, address: VirtualAddress) {
        self.debug.breakpoints.insert(address);
    }

    pub fn set_trace(&mut self, trace: bool) {
        self.debug.trace = trace;
    }

    /// Stop after `steps` more instructions (`None` to stop
    /// single-stepping).
    pub fn set_single_step(&mut self, steps: Option<u64>) {
        self.debug.steps_remaining = steps;
    }

    /// Run until something stops the processor, or until `limit`
    /// instructions have been executed.
    pub fn run(&mut self, limit: Option<u64>) -> Result<StopReason, Bugcheck> {
        let result = match (self.extended, self.debug.is_active()) {
            (false, false) => self.run_loop::<false, false>(limit),
            (false, true) => self.run_loop::<false, true>(limit),
            (true, false) => self.run_loop::<true, false>(limit),
            (true, true) => self.run_loop::<true, true>(limit),
        };
        match &result {
            Ok(reason) => {
                event!(Level::DEBUG, "stopped at {}: {:?}", self.cpu.pc, reason);
            }
            Err(bug) => {
                self.halted = true;
                let diagnostics = self.diagnostics();
                event!(Level::ERROR, "bugcheck during {}: {}", &diagnostics, bug);
            }
        }
        result
    }

    /// Stop conditions checked before each instruction of a debug
    /// loop.
    fn debug_stop(&mut self) -> Option<StopReason> {
        if self.debug.steps_remaining == Some(0) {
            self.debug.steps_remaining = None;
            return Some(StopReason::StepLimit);
        }
        let pc = self.cpu.pc;
        if self.debug.breakpoints.contains(&pc) {
            if self.cpu.one_proceed {
                // Proceeding over the breakpoint we stopped at.
                return None;
            }
            self.cpu.one_proceed = true;
            return Some(StopReason::Breakpoint(pc));
        }
        None
    }

    fn run_loop<const EXT: bool, const DEBUG: bool>(
        &mut self,
        limit: Option<u64>,
    ) -> Result<StopReason, Bugcheck> {
        let mut executed: u64 = 0;
        loop {
            if self.halted {
                return Ok(StopReason::Halted);
            }
            if self.needs_sync() {
                self.sync()?;
            }
            if limit.is_some_and(|limit| executed >= limit) {
                return Ok(StopReason::InstructionLimit);
            }
            if DEBUG {
                if let Some(reason) = self.debug_stop() {
                    return Ok(reason);
                }
            }
            let outcome = if DEBUG {
                let span = span!(Level::TRACE, "insn", pc = %self.cpu.pc);
                let _enter = span.enter();
                self.step::<EXT, DEBUG>()
            } else {
                self.step::<EXT, DEBUG>()
            };
            match outcome {
                Ok(()) => (),
                Err(Abort::Interrupted) => {
                    // Restarted from scratch after the synchronization
                    // point.
                    self.unwind_modes();
                    continue;
                }
                Err(Abort::PageFail(failure)) => {
                    self.unwind_modes();
                    self.deliver_page_fail(failure)?;
                }
                Err(Abort::Fatal(bug)) => {
                    self.unwind_modes();
                    return Err(bug);
                }
            }
            executed += 1;
            self.instructions += 1;
            self.clock.count_instruction();
            if DEBUG {
                self.cpu.undo_one_proceed();
                if let Some(n) = self.debug.steps_remaining.as_mut() {
                    *n = n.saturating_sub(1);
                }
            }
            if self.idle {
                self.idle = false;
                return Ok(StopReason::Idle);
            }
        }
    }

    fn fetch(&mut self) -> Result<Word, Abort> {
        let pc = self.cpu.pc;
        if pc.is_ac_address() {
            return Ok(self.cpu.ac(pc.offset() as u8));
        }
        let space = self.cpu.current_space();
        let generation = self.mem.generation();
        let physical_page = match self.fetch_cache.lookup(generation, space, pc.page()) {
            Some(page) => page,
            None => {
                let physical = self.mem.translate(space, pc, false)?;
                self.fetch_cache
                    .store(generation, space, pc.page(), physical.page());
                physical.page()
            }
        };
        match self
            .mem
            .read_physical(PhysicalAddress::from_page(physical_page, pc.word_in_page()))
        {
            Ok(word) => Ok(word),
            // Take the slow path to report the non-existent memory.
            Err(_) => self.read(Ea::local(pc), Phase::Fetch),
        }
    }

    /// Fetch and execute one instruction, then move the PC on.
    fn step<const EXT: bool, const DEBUG: bool>(&mut self) -> Result<(), Abort> {
        let pc = self.cpu.pc;
        let inst = Instruction::new(self.fetch()?);
        self.cpu.last_instruction = inst;
        let section = if EXT { pc.section() } else { 0 };
        self.cpu.fetched_section = section;
        let ea = self.resolve(inst, section)?;
        if DEBUG && self.debug.trace {
            event!(Level::TRACE, "{} {} E={}", pc, inst, ea.address);
        }
        match DISPATCH[usize::from(inst.opcode())](self, inst, ea)? {
            PcInc::Jumped => {
                if self.cpu.pc == pc && self.is_idle_loop(inst) {
                    self.idle = true;
                }
            }
            PcInc::Next => self.cpu.pc = pc.successor(),
            PcInc::Skip => self.cpu.pc = pc.successor().successor(),
        }
        Ok(())
    }

    fn is_idle_loop(&self, inst: Instruction) -> bool {
        inst.opcode() == opcodes::JRST
            && inst.ac() == 0
            && self.pi.is_on()
            && matches!(self.clock.model(), TickModel::HostInterrupt)
    }
}
