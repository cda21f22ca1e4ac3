/// Diagnostic information for log messages and bugchecks.
///
/// The machine itself has no way of reporting what it was doing when
/// something went wrong inside the processor, but the emulator does.
use std::fmt::{Display, Formatter};

use base::instruction::Instruction;
use base::prelude::VirtualAddress;

/// CurrentInstructionDiagnostics is only for generating debug
/// information.  It must not be used for control/execution purposes.
///
/// A clone of this struct needs to remain cheap, because we build
/// one in places where it is unlikely to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentInstructionDiagnostics {
    pub current_instruction: Instruction,
    pub instruction_address: VirtualAddress,
}

impl Display for &CurrentInstructionDiagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "instruction {} ({}) at address {}",
            self.current_instruction,
            self.current_instruction.word(),
            self.instruction_address
        )
    }
}

pub trait DiagnosticFetcher {
    fn diagnostics(self) -> CurrentInstructionDiagnostics;
}

impl DiagnosticFetcher for CurrentInstructionDiagnostics {
    fn diagnostics(self) -> CurrentInstructionDiagnostics {
        self
    }
}

impl DiagnosticFetcher for &CurrentInstructionDiagnostics {
    fn diagnostics(self) -> CurrentInstructionDiagnostics {
        *self
    }
}

#[test]
fn diagnostics_mention_the_instruction_and_its_address() {
    use base::instruction::opcodes;
    let diags = CurrentInstructionDiagnostics {
        current_instruction: Instruction::from_fields(opcodes::MOVE, 1, false, 0, 0o100),
        instruction_address: VirtualAddress::new(0, 0o1000),
    };
    let text = (&diags).to_string();
    assert!(text.starts_with("instruction MOVE 1,100"), "{text}");
    assert!(text.ends_with("at address 001000"), "{text}");
}
