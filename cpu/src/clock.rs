//! Emulated time: the tick models, the free-running time base and
//! the interval timer device (TIM, device 020, with its PI
//! assignment on MTR, device 024).
//!
//! The instruction loop calls [`Clock::count_instruction`] on every
//! instruction and enters the synchronization point when
//! [`Clock::is_exhausted`] says the countdown has run out (or when the
//! attention flag is raised).  At the synchronization point,
//! [`Clock::take_due_ticks`] says how many scheduler ticks to apply:
//!
//! - in the counting model, one tick is due every
//!   `instructions_per_tick` instructions;
//! - in the host interrupt model, the countdown never runs out (in
//!   practice) and the ticks are those counted by the host timer
//!   since the last synchronization point.
//!
//! ## Interval timer
//!
//! | Operation | Bits   | Meaning |
//! | --------- | ------ | ------- |
//! | CONO TIM  | 400000 | clear the count |
//! | CONO TIM  | 040000 | enable |
//! | CONO TIM  | 020000 | clear done and overflow |
//! | CONO TIM  | 007777 | period, in units of 10 microseconds |
//! | CONI TIM  | LH     | count since the last expiry (10 microsecond units) |
//! | CONI TIM  | 040000 | enabled |
//! | CONI TIM  | 020000 | done |
//! | CONI TIM  | 010000 | overflow (expired again while done was set) |
//! | CONI TIM  | 000007 | PI channel |
//! | CONO MTR  | 000007 | set the interval timer's PI channel |
//! | DATAI TIM | -      | the time base, in microseconds |
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use conv::*;
use tracing::{event, Level};

use base::prelude::*;

use super::config::TickModel;
use super::pi::channel_bit;
use super::timer::{TimerError, TimerHandle, TimerScheduler};

const CONO_CLEAR_COUNT: u32 = 0o400_000;
const TIM_ENABLE: u32 = 0o040_000;
const TIM_DONE: u32 = 0o020_000;
const TIM_OVERFLOW: u32 = 0o010_000;
const TIM_PERIOD_MASK: u32 = 0o007_777;
const PIA_MASK: u32 = 0o000_007;

/// Microseconds per unit of the interval timer's period.
const USEC_PER_PERIOD_UNIT: u64 = 10;

#[derive(Debug)]
pub struct Clock {
    model: TickModel,
    countdown: u32,
    host_ticks: Arc<AtomicU32>,
    usec_per_tick: u64,
    time_base: u64,
    period: u32,
    enabled: bool,
    done: bool,
    overflow: bool,
    pia: u8,
    last_expiry: u64,
    timer: Option<TimerHandle>,
}

impl Clock {
    pub fn new(model: TickModel, usec_per_tick: u64) -> Clock {
        let countdown = match model {
            TickModel::Counting {
                instructions_per_tick,
            } => instructions_per_tick,
            TickModel::HostInterrupt => u32::MAX,
        };
        Clock {
            model,
            countdown,
            host_ticks: Arc::new(AtomicU32::new(0)),
            usec_per_tick,
            time_base: 0,
            period: 0,
            enabled: false,
            done: false,
            overflow: false,
            pia: 0,
            last_expiry: 0,
            timer: None,
        }
    }

    pub fn model(&self) -> TickModel {
        self.model
    }

    /// The counter a host interval timer increments.
    pub fn host_tick_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.host_ticks)
    }

    #[inline]
    pub fn count_instruction(&mut self) {
        self.countdown = self.countdown.saturating_sub(1);
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.countdown == 0
    }

    /// The number of scheduler ticks which have become due since the
    /// last call.
    pub fn take_due_ticks(&mut self) -> u32 {
        match self.model {
            TickModel::Counting {
                instructions_per_tick,
            } => {
                if self.countdown == 0 {
                    self.countdown = instructions_per_tick;
                    1
                } else {
                    0
                }
            }
            TickModel::HostInterrupt => {
                self.countdown = u32::MAX;
                self.host_ticks.swap(0, Ordering::AcqRel)
            }
        }
    }

    /// Advance the time base by one tick.
    pub fn tick(&mut self) {
        self.time_base = self.time_base.wrapping_add(self.usec_per_tick);
    }

    /// Emulated microseconds since the machine was created.
    pub fn time_base(&self) -> u64 {
        self.time_base
    }

    pub fn set_usec_per_tick(&mut self, usec_per_tick: u64) {
        self.usec_per_tick = usec_per_tick;
    }

    pub(crate) fn set_timer(&mut self, handle: TimerHandle) {
        self.timer = Some(handle);
    }

    /// The interval timer has expired.
    pub fn expire(&mut self) {
        if self.done {
            self.overflow = true;
        }
        self.done = true;
        self.last_expiry = self.time_base;
        event!(Level::TRACE, "interval timer expired at {}us", self.time_base);
    }

    /// The PI request mask contributed by the interval timer.
    pub fn request_mask(&self) -> u8 {
        if self.done && self.pia != 0 {
            channel_bit(self.pia)
        } else {
            0
        }
    }

    /// The interval timer's period in microseconds, if it should be
    /// running.
    fn running_period_usec(&self) -> Option<u64> {
        if self.enabled && self.period != 0 {
            Some(u64::from(self.period) * USEC_PER_PERIOD_UNIT)
        } else {
            None
        }
    }

    /// Make the scheduler entry for the interval timer agree with the
    /// TIM registers.
    pub fn reprogram<C>(&self, timers: &mut TimerScheduler<C>) -> Result<(), TimerError> {
        let Some(handle) = self.timer else {
            return Ok(());
        };
        match self.running_period_usec() {
            Some(usec) => {
                timers.set_interval(handle, usec)?;
                timers.activate(handle)
            }
            None => timers.quiesce(handle),
        }
    }

    /// Returns true when the countdown has to be restarted (or
    /// stopped) to agree with the new register contents.  Clearing
    /// done alone leaves the countdown running.
    pub fn cono_tim(&mut self, bits: u32) -> bool {
        let clear_count = bits & CONO_CLEAR_COUNT != 0;
        if clear_count {
            self.last_expiry = self.time_base;
        }
        if bits & TIM_DONE != 0 {
            self.done = false;
            self.overflow = false;
        }
        let enabled = bits & TIM_ENABLE != 0;
        let period = bits & TIM_PERIOD_MASK;
        let restart = clear_count || enabled != self.enabled || period != self.period;
        self.enabled = enabled;
        self.period = period;
        event!(
            Level::DEBUG,
            "interval timer {} with period {}{}",
            if self.enabled { "enabled" } else { "disabled" },
            self.period,
            if restart { ", restarted" } else { "" }
        );
        restart
    }

    pub fn coni_tim(&self) -> Word {
        let elapsed = self.time_base.wrapping_sub(self.last_expiry) / USEC_PER_PERIOD_UNIT;
        let count = u32::value_from(elapsed).unwrap_or(u32::MAX);
        let mut rh = u32::from(self.pia);
        if self.enabled {
            rh |= TIM_ENABLE;
        }
        if self.done {
            rh |= TIM_DONE;
        }
        if self.overflow {
            rh |= TIM_OVERFLOW;
        }
        Word::from_halves(count.min(HALF_MASK), rh)
    }

    pub fn datai_tim(&self) -> Word {
        Word::new(self.time_base)
    }

    pub fn cono_mtr(&mut self, bits: u32) {
        self.pia = (bits & PIA_MASK) as u8;
    }

    pub fn coni_mtr(&self) -> Word {
        Word::from(u32::from(self.pia))
    }

    /// I/O reset: the interval timer stops and forgets its state.
    /// The caller must [`Clock::reprogram`] afterwards.
    pub fn reset(&mut self) {
        self.enabled = false;
        self.done = false;
        self.overflow = false;
        self.period = 0;
        self.pia = 0;
        self.last_expiry = self.time_base;
    }
}
