//! The arithmetic processor (APR) flags, device 000.
//!
//! The APR reports conditions detected by the processor itself
//! (non-existent memory, parity errors and so on).  Each condition
//! has a flag and an enable; an enabled flag which is set is an
//! interrupt request on the APR's PI channel.
//!
//! ## CONO APR
//!
//! | Bits   | Effect |
//! | ------ | ------ |
//! | 200000 | I/O reset (reset every device on the buses) |
//! | 100000 | enable the selected flags |
//! | 040000 | disable the selected flags |
//! | 020000 | clear the selected flags |
//! | 010000 | set the selected flags |
//! | 007760 | flag select |
//! | 000007 | PI channel |
//!
//! CONI APR returns the enables in the left half and, in the right
//! half, the flags, 000010 if the APR is requesting an interrupt and
//! the PI channel.
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

use super::changelog::ChangeIndex;
use super::pi::channel_bit;

const CONO_IO_RESET: u32 = 0o200_000;
const CONO_ENABLE: u32 = 0o100_000;
const CONO_DISABLE: u32 = 0o040_000;
const CONO_CLEAR: u32 = 0o020_000;
const CONO_SET: u32 = 0o010_000;
const FLAG_MASK: u32 = 0o007_760;
const PIA_MASK: u32 = 0o000_007;
const CONI_REQUESTING: u32 = 0o000_010;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum AprFlag {
    SbusError,
    NonExistentMemory,
    IoPageFailure,
    MbParity,
    CacheDirectoryParity,
    AddressParity,
    PowerFailure,
    SweepDone,
}

impl AprFlag {
    pub const ALL: [AprFlag; 8] = [
        AprFlag::SbusError,
        AprFlag::NonExistentMemory,
        AprFlag::IoPageFailure,
        AprFlag::MbParity,
        AprFlag::CacheDirectoryParity,
        AprFlag::AddressParity,
        AprFlag::PowerFailure,
        AprFlag::SweepDone,
    ];

    /// The CONO/CONI bit for this flag.
    pub const fn bit(self) -> u32 {
        match self {
            AprFlag::SbusError => 0o4000,
            AprFlag::NonExistentMemory => 0o2000,
            AprFlag::IoPageFailure => 0o1000,
            AprFlag::MbParity => 0o0400,
            AprFlag::CacheDirectoryParity => 0o0200,
            AprFlag::AddressParity => 0o0100,
            AprFlag::PowerFailure => 0o0040,
            AprFlag::SweepDone => 0o0020,
        }
    }
}

impl Display for AprFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str(match self {
            AprFlag::SbusError => "SBUS",
            AprFlag::NonExistentMemory => "NXM",
            AprFlag::IoPageFailure => "IOPF",
            AprFlag::MbParity => "MBPAR",
            AprFlag::CacheDirectoryParity => "CDPAR",
            AprFlag::AddressParity => "ADPAR",
            AprFlag::PowerFailure => "PWR",
            AprFlag::SweepDone => "SWEEP",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AprStatus {
    pub name: String,
    pub enabled: bool,
    pub set: bool,
}

/// What a CONO APR asks of the rest of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AprConoEffect {
    None,
    IoReset,
}

#[derive(Debug, Default)]
pub struct Apr {
    flags: u32,
    enables: u32,
    pia: u8,
    changes: ChangeIndex<AprFlag>,
}

impl Apr {
    pub fn new() -> Apr {
        Apr::default()
    }

    fn note_changes(&mut self, before_flags: u32, before_enables: u32) {
        let changed = (before_flags ^ self.flags) | (before_enables ^ self.enables);
        for flag in AprFlag::ALL {
            if changed & flag.bit() != 0 {
                self.changes.add(flag);
            }
        }
    }

    pub fn is_set(&self, flag: AprFlag) -> bool {
        self.flags & flag.bit() != 0
    }

    pub fn set_flag(&mut self, flag: AprFlag) {
        let (f, e) = (self.flags, self.enables);
        self.flags |= flag.bit();
        self.note_changes(f, e);
        event!(Level::DEBUG, "APR flag {} set", flag);
    }

    pub fn is_requesting(&self) -> bool {
        self.flags & self.enables != 0
    }

    /// The PI request mask contributed by the APR.
    pub fn request_mask(&self) -> u8 {
        if self.is_requesting() && self.pia != 0 {
            channel_bit(self.pia)
        } else {
            0
        }
    }

    pub fn cono(&mut self, bits: u32) -> AprConoEffect {
        let (f, e) = (self.flags, self.enables);
        let selected = bits & FLAG_MASK;
        if bits & CONO_ENABLE != 0 {
            self.enables |= selected;
        }
        if bits & CONO_DISABLE != 0 {
            self.enables &= !selected;
        }
        if bits & CONO_CLEAR != 0 {
            self.flags &= !selected;
        }
        if bits & CONO_SET != 0 {
            self.flags |= selected;
        }
        self.pia = (bits & PIA_MASK) as u8;
        self.note_changes(f, e);
        if bits & CONO_IO_RESET != 0 {
            AprConoEffect::IoReset
        } else {
            AprConoEffect::None
        }
    }

    pub fn coni(&self) -> Word {
        let mut rh = self.flags | u32::from(self.pia);
        if self.is_requesting() {
            rh |= CONI_REQUESTING;
        }
        Word::from_halves(self.enables, rh)
    }

    pub fn reset(&mut self) {
        let (f, e) = (self.flags, self.enables);
        self.flags = 0;
        self.enables = 0;
        self.pia = 0;
        self.note_changes(f, e);
    }

    fn status_of(&self, flag: AprFlag) -> AprStatus {
        AprStatus {
            name: flag.to_string(),
            enabled: self.enables & flag.bit() != 0,
            set: self.flags & flag.bit() != 0,
        }
    }

    pub fn statuses(&self) -> Vec<AprStatus> {
        AprFlag::ALL.iter().map(|f| self.status_of(*f)).collect()
    }

    /// The status of each flag which changed since the last call.
    pub fn drain_changes(&mut self) -> BTreeMap<AprFlag, AprStatus> {
        self.changes
            .drain()
            .into_iter()
            .map(|flag| (flag, self.status_of(flag)))
            .collect()
    }
}

#[test]
fn enabled_flag_requests_interrupt() {
    let mut apr = Apr::new();
    assert_eq!(
        apr.cono(CONO_ENABLE | AprFlag::NonExistentMemory.bit() | 3),
        AprConoEffect::None
    );
    assert_eq!(apr.request_mask(), 0);
    apr.set_flag(AprFlag::NonExistentMemory);
    assert_eq!(apr.request_mask(), channel_bit(3));
    assert_eq!(apr.coni(), Word::from_halves(0o2000, 0o2013));
    apr.cono(CONO_CLEAR | AprFlag::NonExistentMemory.bit() | 3);
    assert_eq!(apr.request_mask(), 0);
}

#[test]
fn changes_are_drained_once() {
    let mut apr = Apr::new();
    apr.set_flag(AprFlag::PowerFailure);
    let changes = apr.drain_changes();
    assert_eq!(changes.len(), 1);
    assert!(changes[&AprFlag::PowerFailure].set);
    assert!(apr.drain_changes().is_empty());
    assert_eq!(apr.cono(CONO_IO_RESET), AprConoEffect::IoReset);
}
