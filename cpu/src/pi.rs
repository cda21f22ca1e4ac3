//! The priority interrupt (PI) system.
//!
//! There are seven channels, numbered 1 to 7; channel 1 has the
//! highest priority.  Channel state is held as 8-bit masks in which
//! channel `n` is bit `0o200 >> n` (so channel 1 is 0o100 and channel
//! 7 is 0o001; the 0o200 bit, "channel 0", is never used).  Because
//! higher priority channels have more significant bits, the highest
//! priority channel in a mask is found by counting leading zeros.
//!
//! | State       | Meaning |
//! | ----------- | ------- |
//! | Disabled    | the channel's level is off; device requests are ignored |
//! | Enabled     | the level is on, nothing is requesting |
//! | Requested   | a device (level on) or the program is requesting |
//! | In progress | an interrupt on the channel has been taken and not dismissed |
//!
//! In-progress channels nest like a stack: a request is honoured only
//! if it is of higher priority than every channel already in
//! progress.  Only an explicit dismissal (JRST 10, JEN, XJEN) takes a
//! channel out of progress, and it always removes the highest
//! priority one.
//!
//! ## CONO PI
//!
//! | Bits   | Effect |
//! | ------ | ------ |
//! | 020000 | drop program requests on selected levels |
//! | 010000 | clear the PI system |
//! | 004000 | program-request the selected levels |
//! | 002000 | turn on the selected levels |
//! | 001000 | turn off the selected levels |
//! | 000400 | turn the PI system off |
//! | 000200 | turn the PI system on |
//! | 000177 | level select (0100 is channel 1) |
//!
//! ## CONI PI
//!
//! Left half bits 11-17 are the program requests.  In the right half,
//! bits 21-27 are the channels in progress, bit 28 says the PI system
//! is on and bits 29-35 are the levels which are on.
use serde::Serialize;
use tracing::{event, Level};

use base::prelude::*;

/// The mask covering channels 1-7.
pub const ALL_CHANNELS: u8 = 0o177;

const CONO_DROP_PROGRAM_REQUESTS: u32 = 0o020_000;
const CONO_CLEAR_SYSTEM: u32 = 0o010_000;
const CONO_REQUEST: u32 = 0o004_000;
const CONO_LEVELS_ON: u32 = 0o002_000;
const CONO_LEVELS_OFF: u32 = 0o001_000;
const CONO_SYSTEM_OFF: u32 = 0o000_400;
const CONO_SYSTEM_ON: u32 = 0o000_200;

const CONI_SYSTEM_ON: u32 = 0o000_200;

/// The mask bit for a PI channel (1-7).
pub const fn channel_bit(channel: u8) -> u8 {
    0o200 >> (channel & 7)
}

/// The highest priority channel in `mask`, if any.
pub const fn highest_channel(mask: u8) -> Option<u8> {
    let mask = mask & ALL_CHANNELS;
    if mask == 0 {
        None
    } else {
        Some(mask.leading_zeros() as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PiStatus {
    pub system_on: bool,
    pub levels_on: u8,
    pub device_requests: u8,
    pub program_requests: u8,
    pub apr_requests: u8,
    pub in_progress: u8,
}

#[derive(Debug, Default, Clone)]
pub struct PiController {
    system_on: bool,
    levels_on: u8,
    dev: u8,
    prog: u8,
    apr: u8,
    in_progress: u8,
}

impl PiController {
    pub fn new() -> PiController {
        PiController::default()
    }

    pub fn status(&self) -> PiStatus {
        PiStatus {
            system_on: self.system_on,
            levels_on: self.levels_on,
            device_requests: self.dev,
            program_requests: self.prog,
            apr_requests: self.apr,
            in_progress: self.in_progress,
        }
    }

    pub fn is_on(&self) -> bool {
        self.system_on
    }

    pub fn in_progress(&self) -> u8 {
        self.in_progress
    }

    pub fn device_requests(&self) -> u8 {
        self.dev
    }

    /// Replace the aggregate of device requests.
    pub fn set_device_requests(&mut self, mask: u8) {
        self.dev = mask & ALL_CHANNELS;
    }

    /// Replace the requests which come from the APR.
    pub fn set_apr_requests(&mut self, mask: u8) {
        self.apr = mask & ALL_CHANNELS;
    }

    pub fn program_request(&mut self, mask: u8) {
        self.prog |= mask & ALL_CHANNELS;
    }

    pub fn enable_levels(&mut self, mask: u8) {
        self.levels_on |= mask & ALL_CHANNELS;
    }

    pub fn set_system_on(&mut self, on: bool) {
        self.system_on = on;
    }

    /// Which channels are requesting, regardless of what is in
    /// progress.
    pub fn requesting(&self) -> u8 {
        (((self.dev | self.apr) & self.levels_on) | self.prog) & ALL_CHANNELS
    }

    /// Choose the channel to interrupt on, if any.  The result is
    /// requesting, not in progress, and of higher priority than every
    /// channel which is in progress.
    pub fn select(&self) -> Option<u8> {
        if !self.system_on {
            return None;
        }
        let mut eligible = self.requesting() & !self.in_progress;
        if let Some(busy) = highest_channel(self.in_progress) {
            // Keep only channels more significant than the busiest one.
            let bit = channel_bit(busy);
            eligible &= !((bit << 1).wrapping_sub(1));
        }
        highest_channel(eligible)
    }

    /// Mark `channel` as in progress; the latched device request on it
    /// has been answered.
    pub fn begin(&mut self, channel: u8) {
        let bit = channel_bit(channel);
        self.in_progress |= bit;
        self.dev &= !bit;
        event!(Level::DEBUG, "PI channel {} now in progress", channel);
    }

    /// Take the highest priority channel out of progress, returning
    /// it.
    pub fn dismiss(&mut self) -> Option<u8> {
        let channel = highest_channel(self.in_progress)?;
        self.in_progress &= !channel_bit(channel);
        event!(Level::DEBUG, "PI channel {} dismissed", channel);
        Some(channel)
    }

    pub fn reset(&mut self) {
        self.system_on = false;
        self.levels_on = 0;
        self.prog = 0;
        self.in_progress = 0;
    }

    pub fn cono(&mut self, bits: u32) {
        let selected = (bits & u32::from(ALL_CHANNELS)) as u8;
        if bits & CONO_CLEAR_SYSTEM != 0 {
            self.reset();
        }
        if bits & CONO_DROP_PROGRAM_REQUESTS != 0 {
            self.prog &= !selected;
        }
        if bits & CONO_REQUEST != 0 {
            self.prog |= selected;
        }
        if bits & CONO_LEVELS_ON != 0 {
            self.levels_on |= selected;
        }
        if bits & CONO_LEVELS_OFF != 0 {
            self.levels_on &= !selected;
        }
        if bits & CONO_SYSTEM_OFF != 0 {
            self.system_on = false;
        }
        if bits & CONO_SYSTEM_ON != 0 {
            self.system_on = true;
        }
        event!(Level::TRACE, "CONO PI,{:06o} -> {:?}", bits, self.status());
    }

    pub fn coni(&self) -> Word {
        let mut rh = (u32::from(self.in_progress) << 8) | u32::from(self.levels_on);
        if self.system_on {
            rh |= CONI_SYSTEM_ON;
        }
        Word::from_halves(u32::from(self.prog), rh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[test]
    fn channel_numbering() {
        assert_eq!(channel_bit(1), 0o100);
        assert_eq!(channel_bit(7), 0o001);
        assert_eq!(highest_channel(0o011), Some(4));
        assert_eq!(highest_channel(0), None);
    }

    #[test]
    fn nothing_happens_with_the_system_off() {
        let mut pi = PiController::new();
        pi.cono(CONO_LEVELS_ON | 0o177);
        pi.set_device_requests(channel_bit(3));
        assert_eq!(pi.select(), None);
        pi.cono(CONO_SYSTEM_ON);
        assert_eq!(pi.select(), Some(3));
    }

    #[test]
    fn device_request_on_disabled_level_is_ignored() {
        let mut pi = PiController::new();
        pi.cono(CONO_SYSTEM_ON | CONO_LEVELS_ON | u32::from(channel_bit(5)));
        pi.set_device_requests(channel_bit(3));
        assert_eq!(pi.select(), None);
        // Program requests do not need the level to be on.
        pi.cono(CONO_REQUEST | u32::from(channel_bit(3)));
        assert_eq!(pi.select(), Some(3));
    }

    #[test]
    fn dismiss_then_request_again() {
        let mut pi = PiController::new();
        pi.cono(CONO_SYSTEM_ON | CONO_LEVELS_ON | 0o177);
        pi.set_device_requests(channel_bit(2));
        assert_eq!(pi.select(), Some(2));
        pi.begin(2);
        assert_eq!(pi.select(), None);
        // A lower priority request must wait.
        pi.set_device_requests(channel_bit(5));
        assert_eq!(pi.select(), None);
        assert_eq!(pi.dismiss(), Some(2));
        assert_eq!(pi.select(), Some(5));
        pi.set_device_requests(channel_bit(2) | channel_bit(5));
        assert_eq!(pi.select(), Some(2));
    }

    #[test]
    fn coni_layout() {
        let mut pi = PiController::new();
        pi.cono(CONO_SYSTEM_ON | CONO_LEVELS_ON | 0o177);
        pi.cono(CONO_REQUEST | u32::from(channel_bit(7)));
        pi.begin(4);
        assert_eq!(pi.coni(), Word::from_halves(0o001, 0o004_377));
        pi.cono(CONO_CLEAR_SYSTEM);
        assert_eq!(pi.coni(), Word::ZERO);
    }

    #[proptest]
    fn selection_respects_priority_and_enables(
        #[strategy(0_u8..=0o177)] levels: u8,
        #[strategy(0_u8..=0o177)] dev: u8,
        #[strategy(0_u8..=0o177)] prog: u8,
        #[strategy(0_u8..=0o177)] apr: u8,
        #[strategy(0_u8..=0o177)] in_progress: u8,
    ) {
        let pi = PiController {
            system_on: true,
            levels_on: levels,
            dev,
            prog,
            apr,
            in_progress,
        };
        if let Some(ch) = pi.select() {
            let bit = channel_bit(ch);
            proptest::prop_assert!((1..=7).contains(&ch));
            proptest::prop_assert_eq!(in_progress & bit, 0);
            if let Some(busy) = highest_channel(in_progress) {
                proptest::prop_assert!(ch < busy);
            }
            // A channel requested only by a device must be enabled.
            if prog & bit == 0 {
                proptest::prop_assert_ne!(levels & bit, 0);
            }
            // Nothing more important was eligible.
            for better in 1..ch {
                let b = channel_bit(better);
                let wanted = ((dev | apr) & levels & b) != 0 || prog & b != 0;
                let blocked = in_progress & b != 0
                    || highest_channel(in_progress).is_some_and(|busy| better >= busy);
                proptest::prop_assert!(!wanted || blocked);
            }
        }
    }
}
