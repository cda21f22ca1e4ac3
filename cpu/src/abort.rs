//! Aborts (the non-local exits from a partly-executed instruction)
//! and bugchecks (internal errors which stop the emulator).
//!
//! Guest-visible faults are never reported to the host.  A page
//! failure aborts the current instruction and is delivered to the
//! guest operating system through the page-fail vector.  An
//! interrupted instruction (one whose indirection chain was cut short
//! so that a pending interrupt could be taken) is simply restarted.
//!
//! A [`Bugcheck`] on the other hand indicates that the emulator (or
//! its configuration) is broken; the machine halts.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use base::prelude::*;

use super::context::AddressSpace;
use super::timer::TimerError;

/// Why a memory reference failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFailureCause {
    /// There is no mapping for the page.
    NotMapped,
    /// The page is mapped, but not writable.
    WriteProtected,
    /// The reference translated to a physical address beyond the end
    /// of memory.
    NonExistentMemory,
    /// An indirect word had both bits 0 and 1 set.
    IllegalIndirect,
    /// Nothing answered at this bus address.
    NonExistentDevice { adapter: u8, address: u32 },
}

/// A failed memory reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFailure {
    pub cause: PageFailureCause,
    pub address: VirtualAddress,
    pub space: AddressSpace,
    pub write: bool,
}

/// Page-fail word bits (in the left half).
const PF_USER: u32 = 0o400_000;
const PF_HARD: u32 = 0o200_000;
const PF_ACCESSIBLE: u32 = 0o100_000;
const PF_WRITE: u32 = 0o040_000;
const PF_INDIRECT: u32 = 0o020_000;

impl PageFailure {
    pub fn new(
        cause: PageFailureCause,
        address: VirtualAddress,
        space: AddressSpace,
        write: bool,
    ) -> PageFailure {
        PageFailure {
            cause,
            address,
            space,
            write,
        }
    }

    /// The page-fail word stored for the operating system.  Bits 0-5
    /// describe the failure, bits 6-35 hold the failing address (or,
    /// for a bus error, the adapter number and bus address).
    ///
    /// | Bit | Meaning |
    /// | --- | ------- |
    /// | 0   | user-space reference |
    /// | 1   | hard failure (non-existent memory or device) |
    /// | 2   | page was accessible |
    /// | 3   | write reference |
    /// | 4   | illegal indirect word |
    pub fn word(&self) -> Word {
        let mut lh: u32 = 0;
        if self.space == AddressSpace::User {
            lh |= PF_USER;
        }
        if self.write {
            lh |= PF_WRITE;
        }
        let address = match self.cause {
            PageFailureCause::NotMapped => self.address.bits(),
            PageFailureCause::WriteProtected => {
                lh |= PF_ACCESSIBLE;
                self.address.bits()
            }
            PageFailureCause::NonExistentMemory => {
                lh |= PF_HARD | PF_ACCESSIBLE;
                self.address.bits()
            }
            PageFailureCause::IllegalIndirect => {
                lh |= PF_INDIRECT | PF_ACCESSIBLE;
                self.address.bits()
            }
            PageFailureCause::NonExistentDevice { adapter, address } => {
                lh |= PF_HARD;
                VirtualAddress::new(u32::from(adapter), address).bits()
            }
        };
        Word::from_halves(lh, 0) | Word::from(address)
    }

    pub fn is_non_existent_memory(&self) -> bool {
        self.cause == PageFailureCause::NonExistentMemory
    }
}

impl Display for PageFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        let what = if self.write { "write" } else { "read" };
        match self.cause {
            PageFailureCause::NotMapped => {
                write!(f, "{what} of unmapped {:?} address {}", self.space, self.address)
            }
            PageFailureCause::WriteProtected => write!(
                f,
                "write to write-protected {:?} address {}",
                self.space, self.address
            ),
            PageFailureCause::NonExistentMemory => write!(
                f,
                "{what} of non-existent memory at {:?} address {}",
                self.space, self.address
            ),
            PageFailureCause::IllegalIndirect => {
                write!(f, "illegal indirect word at {}", self.address)
            }
            PageFailureCause::NonExistentDevice { adapter, address } => write!(
                f,
                "{what} of non-existent device at bus address {adapter}:{address:06o}"
            ),
        }
    }
}

/// A fatal internal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bugcheck {
    /// The instruction in an interrupt or trap vector location was
    /// neither JSR nor XPCW.
    IllegalVectorInstruction {
        location: PhysicalAddress,
        instruction: Instruction,
    },
    /// A memory reference failed while a vector instruction was being
    /// executed.
    FaultInVector {
        location: PhysicalAddress,
        failure: PageFailure,
    },
    /// The PI system selected a channel but nothing is requesting it.
    UnattributedInterrupt { channel: u8 },
    /// Execution of a vector instruction was abandoned part way.
    VectorAbandoned,
    /// The timer scheduler is broken.
    Timer(TimerError),
}

impl Display for Bugcheck {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Bugcheck::IllegalVectorInstruction {
                location,
                instruction,
            } => write!(
                f,
                "vector location {location} contains {instruction} ({}), which is neither JSR nor XPCW",
                instruction.word()
            ),
            Bugcheck::FaultInVector { location, failure } => write!(
                f,
                "page failure during execution of the vector instruction at {location}: {failure}"
            ),
            Bugcheck::UnattributedInterrupt { channel } => write!(
                f,
                "PI channel {channel} was selected but has no requesting source"
            ),
            Bugcheck::VectorAbandoned => {
                f.write_str("execution of a vector instruction was abandoned")
            }
            Bugcheck::Timer(e) => write!(f, "timer scheduler failure: {e}"),
        }
    }
}

impl Error for Bugcheck {}

/// Why an instruction did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abort {
    /// A memory reference failed; the guest gets a page failure trap.
    PageFail(PageFailure),
    /// An indirection or XCT chain was cut short because something
    /// needs attention.  The instruction is restarted afterwards.
    Interrupted,
    /// The emulator cannot continue.
    Fatal(Bugcheck),
}

impl From<PageFailure> for Abort {
    fn from(pf: PageFailure) -> Abort {
        Abort::PageFail(pf)
    }
}

impl From<Bugcheck> for Abort {
    fn from(b: Bugcheck) -> Abort {
        Abort::Fatal(b)
    }
}

impl Display for Abort {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Abort::PageFail(pf) => write!(f, "page failure: {pf}"),
            Abort::Interrupted => f.write_str("instruction interrupted"),
            Abort::Fatal(bug) => write!(f, "bugcheck: {bug}"),
        }
    }
}

impl Error for Abort {}

#[test]
fn page_fail_word_layout() {
    let pf = PageFailure::new(
        PageFailureCause::WriteProtected,
        VirtualAddress::new(3, 0o1234),
        AddressSpace::User,
        true,
    );
    assert_eq!(pf.word(), Word::from_halves(0o540_003, 0o1234));

    let nxd = PageFailure::new(
        PageFailureCause::NonExistentDevice {
            adapter: 1,
            address: 0o776_000,
        },
        VirtualAddress::ZERO,
        AddressSpace::Exec,
        false,
    );
    assert_eq!(nxd.word(), Word::from_halves(0o200_001, 0o776_000));
}
