//! This crate emulates the KN10 processor core: the instruction
//! loop, effective address calculation, the priority interrupt
//! system, trap and UUO delivery, the timer scheduler and the device
//! buses.
#![crate_name = "kn10"]

mod abort;
mod apr;
mod bus;
mod changelog;
mod clock;
mod config;
mod context;
mod diagnostics;
mod ea;
mod host;
mod kn10;
mod memory;
mod ops;
mod pi;
mod run;
#[cfg(test)]
mod testing;
mod timer;
mod trap;

pub use abort::{Abort, Bugcheck, PageFailure, PageFailureCause};
pub use apr::{AprFlag, AprStatus};
pub use bus::{
    BusError, BusFault, BusWidth, Device, DeviceContext, DeviceId, InterruptRequest, ADAPTERS,
};
pub use config::{ConfigurationError, MachineConfiguration, TickModel, Variant};
pub use context::{AddressSpace, PcFlags};
pub use diagnostics::{CurrentInstructionDiagnostics, DiagnosticFetcher};
pub use ea::{resolve, Ea, EaMemory};
pub use host::{Attention, HostError, HostSupport, Ticker};
pub use kn10::{Kn10, SetupError};
pub use memory::MemoryOpFailure;
pub use ops::PcInc;
pub use pi::PiStatus;
pub use run::StopReason;
pub use timer::{
    Callout, TimerAction, TimerError, TimerHandle, TimerKind, TimerScheduler, TimerState,
    TimerStatistics,
};
