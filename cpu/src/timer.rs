//! The timer scheduler.
//!
//! Devices (and the processor's own interval timer) need to have
//! things happen "later": a disk seek completes, a terminal line is
//! ready for another character, the interval timer expires.  The
//! scheduler keeps a set of callout entries and invokes them as
//! emulated time passes.
//!
//! ## Units
//!
//! The scheduler's unit of time is the *sub-tick*; each call to
//! [`TimerScheduler::advance`] is one sub-tick.  Every
//! `subticks_per_interval` sub-ticks there is an *interval tick*.  A
//! request expressed in microseconds is converted to sub-ticks using
//! the current `usec_per_tick` (rounding up, with a minimum of one).
//!
//! ## Pools
//!
//! All entries live in a fixed-capacity arena, and every entry is a
//! member of exactly one of five pools:
//!
//! | Pool | Contents |
//! | ---- | -------- |
//! | free | unused entries |
//! | quiescent | entries which are allocated but not counting down |
//! | sub-tick | entries due in less than one interval, in sub-ticks |
//! | multi-tick | entries due in one interval or more, in interval ticks |
//! | interval-tick | entries which run at every interval tick |
//!
//! The sub-tick and multi-tick pools are delta queues: each member
//! holds the number of ticks between its predecessor's expiry and its
//! own, so only the head of the queue is decremented on each tick.
//! The running sum of deltas along a queue is the absolute countdown
//! to each member's expiry.
//!
//! Entries are addressed by [`TimerHandle`], an index plus a
//! generation number; killing an entry bumps its generation so that
//! stale handles are detected rather than silently reused.
//!
//! A multi-tick entry counts whole interval ticks and carries the
//! sub-ticks left over after the last of them.  When its interval
//! count runs out it moves to the sub-tick queue for that remainder,
//! so it fires on exactly the sub-tick requested.
use std::error::Error;
use std::fmt::{self, Debug, Display, Formatter};

use serde::Serialize;
use tracing::{event, Level};

#[cfg(test)]
mod tests;

/// A timer callout.  It receives the owner of the scheduler (so that
/// it can change whatever state it needs to, including the scheduler
/// itself) and the argument supplied when the timer was created.
pub type Callout<C> = fn(&mut C, u64) -> TimerAction;

/// What the scheduler should do with an entry whose callout has just
/// run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerAction {
    /// Return the entry to the free pool.
    Kill,
    /// Keep the entry, but stop it counting down.
    Quiesce,
    /// Count down again from the full interval.
    Repeat,
    /// Leave the entry wherever the callout put it.
    NoOp,
}

/// Identifies a timer entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    index: u32,
    generation: u32,
}

impl Debug for TimerHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "TimerHandle({}#{})", self.index, self.generation)
    }
}

/// Which kind of active pool a quiescent entry goes back to when it
/// is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TimerKind {
    /// A countdown timer (sub-tick or multi-tick, depending on its
    /// interval).
    Countdown,
    /// Runs at every interval tick.
    EveryInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TimerState {
    Free,
    ActiveSubTick,
    ActiveMultiTick,
    ActiveIntervalTick,
    Quiescent(TimerKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pool {
    Free = 0,
    Quiescent = 1,
    SubTick = 2,
    MultiTick = 3,
    IntervalTick = 4,
}

const ALL_POOLS: [Pool; 5] = [
    Pool::Free,
    Pool::Quiescent,
    Pool::SubTick,
    Pool::MultiTick,
    Pool::IntervalTick,
];

impl TimerState {
    fn pool(self) -> Pool {
        match self {
            TimerState::Free => Pool::Free,
            TimerState::Quiescent(_) => Pool::Quiescent,
            TimerState::ActiveSubTick => Pool::SubTick,
            TimerState::ActiveMultiTick => Pool::MultiTick,
            TimerState::ActiveIntervalTick => Pool::IntervalTick,
        }
    }

    fn kind(self) -> Option<TimerKind> {
        match self {
            TimerState::Free => None,
            TimerState::ActiveSubTick | TimerState::ActiveMultiTick => Some(TimerKind::Countdown),
            TimerState::ActiveIntervalTick => Some(TimerKind::EveryInterval),
            TimerState::Quiescent(kind) => Some(kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// All entries are in use.
    PoolExhausted { capacity: usize },
    /// The handle refers to an entry which has since been killed.
    StaleHandle(TimerHandle),
    /// The operation is not legal for an entry in this state.
    WrongState {
        handle: TimerHandle,
        state: TimerState,
        operation: &'static str,
    },
    /// The tick length must be at least one microsecond.
    ZeroTickLength,
    /// The pools are not consistent with each other.
    Corrupt(String),
}

impl Display for TimerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            TimerError::PoolExhausted { capacity } => {
                write!(f, "all {capacity} timer entries are in use")
            }
            TimerError::StaleHandle(h) => write!(f, "timer handle {h:?} is stale"),
            TimerError::WrongState {
                handle,
                state,
                operation,
            } => write!(
                f,
                "cannot {operation} timer {handle:?} while it is in state {state:?}"
            ),
            TimerError::ZeroTickLength => f.write_str("the tick length cannot be zero"),
            TimerError::Corrupt(msg) => write!(f, "timer pools are corrupt: {msg}"),
        }
    }
}

impl Error for TimerError {}

/// Counts of entries in each pool, for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerStatistics {
    pub capacity: usize,
    pub free: usize,
    pub quiescent: usize,
    pub sub_tick: usize,
    pub multi_tick: usize,
    pub interval_tick: usize,
    pub usec_per_tick: u64,
    pub subticks_per_interval: u64,
}

struct Slot<C> {
    generation: u32,
    state: TimerState,
    prev: Option<u32>,
    next: Option<u32>,
    /// Ticks after the predecessor's expiry (delta queues only).
    delta: u64,
    /// Absolute sub-tick (or interval tick) number of expiry (delta
    /// queues only).
    deadline: u64,
    /// Sub-ticks still to run once a multi-tick entry's interval
    /// count runs out.
    residue: u64,
    callout: Option<Callout<C>>,
    arg: u64,
    /// The full interval, in sub-ticks.
    interval: u64,
    /// The interval as originally requested.
    usec: u64,
}

impl<C> Slot<C> {
    fn new() -> Slot<C> {
        Slot {
            generation: 0,
            state: TimerState::Free,
            prev: None,
            next: None,
            delta: 0,
            deadline: 0,
            residue: 0,
            callout: None,
            arg: 0,
            interval: 0,
            usec: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct PoolList {
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

struct Fired<C> {
    handle: TimerHandle,
    callout: Callout<C>,
    arg: u64,
    every_interval: bool,
}

pub struct TimerScheduler<C> {
    slots: Vec<Slot<C>>,
    pools: [PoolList; 5],
    usec_per_tick: u64,
    subticks_per_interval: u64,
    /// Sub-ticks elapsed since the last interval tick.
    subtick_phase: u64,
    subtick_count: u64,
    interval_count: u64,
    /// Reused between calls to `advance` to avoid allocating.
    fired: Vec<Fired<C>>,
}

impl<C> Debug for TimerScheduler<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("TimerScheduler")
            .field("statistics", &self.statistics())
            .field("subtick_phase", &self.subtick_phase)
            .field("subtick_count", &self.subtick_count)
            .field("interval_count", &self.interval_count)
            .finish()
    }
}

impl<C> TimerScheduler<C> {
    /// Create a scheduler with `capacity` entries.
    /// `subticks_per_interval` must be at least one.
    pub fn new(
        capacity: usize,
        usec_per_tick: u64,
        subticks_per_interval: u64,
    ) -> Result<TimerScheduler<C>, TimerError> {
        if usec_per_tick == 0 || subticks_per_interval == 0 {
            return Err(TimerError::ZeroTickLength);
        }
        let mut sched = TimerScheduler {
            slots: (0..capacity).map(|_| Slot::new()).collect(),
            pools: [PoolList::default(); 5],
            usec_per_tick,
            subticks_per_interval,
            subtick_phase: 0,
            subtick_count: 0,
            interval_count: 0,
            fired: Vec::with_capacity(capacity),
        };
        for i in 0..capacity {
            sched.link_at_tail(i as u32, TimerState::Free);
        }
        Ok(sched)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn usec_per_tick(&self) -> u64 {
        self.usec_per_tick
    }

    pub fn subticks_per_interval(&self) -> u64 {
        self.subticks_per_interval
    }

    pub fn statistics(&self) -> TimerStatistics {
        let len = |p: Pool| self.pools[p as usize].len;
        TimerStatistics {
            capacity: self.capacity(),
            free: len(Pool::Free),
            quiescent: len(Pool::Quiescent),
            sub_tick: len(Pool::SubTick),
            multi_tick: len(Pool::MultiTick),
            interval_tick: len(Pool::IntervalTick),
            usec_per_tick: self.usec_per_tick,
            subticks_per_interval: self.subticks_per_interval,
        }
    }

    fn ticks_for(&self, usec: u64) -> u64 {
        usec.div_ceil(self.usec_per_tick).max(1)
    }

    fn handle_of(&self, index: u32) -> TimerHandle {
        TimerHandle {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn index_of(&self, handle: TimerHandle) -> Result<u32, TimerError> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.state != TimerState::Free => {
                Ok(handle.index)
            }
            _ => Err(TimerError::StaleHandle(handle)),
        }
    }

    /// Returns true if `handle` refers to an allocated entry.
    pub fn is_live(&self, handle: TimerHandle) -> bool {
        self.index_of(handle).is_ok()
    }

    pub fn state(&self, handle: TimerHandle) -> Result<TimerState, TimerError> {
        let i = self.index_of(handle)?;
        Ok(self.slots[i as usize].state)
    }

    // Linked-list primitives.  These maintain prev/next links, the
    // pool lengths and the entry's state, but know nothing of deltas.

    fn link_at_tail(&mut self, i: u32, state: TimerState) {
        let pool = state.pool() as usize;
        let tail = self.pools[pool].tail;
        {
            let slot = &mut self.slots[i as usize];
            slot.state = state;
            slot.prev = tail;
            slot.next = None;
        }
        match tail {
            Some(t) => self.slots[t as usize].next = Some(i),
            None => self.pools[pool].head = Some(i),
        }
        self.pools[pool].tail = Some(i);
        self.pools[pool].len += 1;
    }

    fn link_before(&mut self, i: u32, state: TimerState, before: u32) {
        let pool = state.pool() as usize;
        let prev = self.slots[before as usize].prev;
        {
            let slot = &mut self.slots[i as usize];
            slot.state = state;
            slot.prev = prev;
            slot.next = Some(before);
        }
        self.slots[before as usize].prev = Some(i);
        match prev {
            Some(p) => self.slots[p as usize].next = Some(i),
            None => self.pools[pool].head = Some(i),
        }
        self.pools[pool].len += 1;
    }

    fn unlink(&mut self, i: u32) {
        let (pool, prev, next) = {
            let slot = &self.slots[i as usize];
            (slot.state.pool() as usize, slot.prev, slot.next)
        };
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.pools[pool].head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.pools[pool].tail = prev,
        }
        self.pools[pool].len -= 1;
        let slot = &mut self.slots[i as usize];
        slot.prev = None;
        slot.next = None;
    }

    /// Take an entry out of whatever pool it is in, keeping the
    /// successor's delta correct.
    fn detach(&mut self, i: u32) {
        let slot = &self.slots[i as usize];
        if matches!(
            slot.state,
            TimerState::ActiveSubTick | TimerState::ActiveMultiTick
        ) {
            if let Some(n) = slot.next {
                let delta = slot.delta;
                self.slots[n as usize].delta += delta;
            }
        }
        self.unlink(i);
        self.slots[i as usize].delta = 0;
    }

    fn insert_delta(&mut self, i: u32, ticks: u64, state: TimerState) {
        let pool = state.pool() as usize;
        let base = match state {
            TimerState::ActiveMultiTick => self.interval_count,
            _ => self.subtick_count,
        };
        self.slots[i as usize].deadline = base + ticks;
        let mut remaining = ticks;
        let mut cursor = self.pools[pool].head;
        while let Some(c) = cursor {
            let d = self.slots[c as usize].delta;
            if remaining < d {
                self.slots[c as usize].delta = d - remaining;
                self.slots[i as usize].delta = remaining;
                self.link_before(i, state, c);
                return;
            }
            remaining -= d;
            cursor = self.slots[c as usize].next;
        }
        self.slots[i as usize].delta = remaining;
        self.link_at_tail(i, state);
    }

    /// Put a detached countdown entry on the right delta queue, due
    /// `subticks` sub-ticks from now.
    fn schedule(&mut self, i: u32, subticks: u64) {
        let subticks = subticks.max(1);
        if subticks < self.subticks_per_interval {
            self.slots[i as usize].residue = 0;
            self.insert_delta(i, subticks, TimerState::ActiveSubTick);
        } else {
            // Count the interval ticks which fall on or before the
            // expiry, then run the rest on the sub-tick queue.
            let span = subticks + self.subtick_phase;
            let intervals = span / self.subticks_per_interval;
            self.slots[i as usize].residue = span % self.subticks_per_interval;
            self.insert_delta(i, intervals, TimerState::ActiveMultiTick);
        }
    }

    fn allocate(&mut self, callout: Callout<C>, arg: u64, usec: u64) -> Result<u32, TimerError> {
        let i = match self.pools[Pool::Free as usize].head {
            Some(i) => i,
            None => {
                event!(Level::WARN, "timer pool exhausted");
                return Err(TimerError::PoolExhausted {
                    capacity: self.capacity(),
                });
            }
        };
        self.unlink(i);
        let interval = self.ticks_for(usec);
        let slot = &mut self.slots[i as usize];
        slot.callout = Some(callout);
        slot.arg = arg;
        slot.usec = usec;
        slot.interval = interval;
        Ok(i)
    }

    /// Allocate a countdown timer which will call `callout` after
    /// `usec` microseconds.
    pub fn get_timer(
        &mut self,
        callout: Callout<C>,
        arg: u64,
        usec: u64,
    ) -> Result<TimerHandle, TimerError> {
        let i = self.allocate(callout, arg, usec)?;
        let interval = self.slots[i as usize].interval;
        self.schedule(i, interval);
        let handle = self.handle_of(i);
        event!(
            Level::TRACE,
            "allocated timer {handle:?} for {usec}us ({interval} sub-ticks)"
        );
        Ok(handle)
    }

    /// Allocate an entry which runs at every interval tick until it
    /// is killed or quiesced.
    pub fn get_interval_timer(
        &mut self,
        callout: Callout<C>,
        arg: u64,
    ) -> Result<TimerHandle, TimerError> {
        let usec = self.usec_per_tick * self.subticks_per_interval;
        let i = self.allocate(callout, arg, usec)?;
        self.slots[i as usize].interval = self.subticks_per_interval;
        self.link_at_tail(i, TimerState::ActiveIntervalTick);
        Ok(self.handle_of(i))
    }

    /// Change the interval of a countdown timer.  An active timer
    /// restarts from the new interval; a quiescent one stays
    /// quiescent.
    pub fn set_interval(&mut self, handle: TimerHandle, usec: u64) -> Result<(), TimerError> {
        let i = self.index_of(handle)?;
        let state = self.slots[i as usize].state;
        if state.kind() != Some(TimerKind::Countdown) {
            return Err(TimerError::WrongState {
                handle,
                state,
                operation: "set the interval of",
            });
        }
        let interval = self.ticks_for(usec);
        {
            let slot = &mut self.slots[i as usize];
            slot.usec = usec;
            slot.interval = interval;
        }
        if state != TimerState::Quiescent(TimerKind::Countdown) {
            self.detach(i);
            self.schedule(i, interval);
        }
        Ok(())
    }

    /// Stop an entry counting down.  Quiescing a quiescent entry has
    /// no effect.
    pub fn quiesce(&mut self, handle: TimerHandle) -> Result<(), TimerError> {
        let i = self.index_of(handle)?;
        let state = self.slots[i as usize].state;
        match (state, state.kind()) {
            (TimerState::Quiescent(_), _) | (_, None) => Ok(()),
            (_, Some(kind)) => {
                self.detach(i);
                self.link_at_tail(i, TimerState::Quiescent(kind));
                Ok(())
            }
        }
    }

    /// Start an entry counting down from its full interval.
    pub fn activate(&mut self, handle: TimerHandle) -> Result<(), TimerError> {
        let i = self.index_of(handle)?;
        match self.slots[i as usize].state.kind() {
            Some(TimerKind::Countdown) => {
                self.detach(i);
                let interval = self.slots[i as usize].interval;
                self.schedule(i, interval);
            }
            Some(TimerKind::EveryInterval) => {
                if self.slots[i as usize].state != TimerState::ActiveIntervalTick {
                    self.detach(i);
                    self.link_at_tail(i, TimerState::ActiveIntervalTick);
                }
            }
            None => {
                return Err(TimerError::Corrupt(format!(
                    "live handle {handle:?} refers to a free entry"
                )))
            }
        }
        Ok(())
    }

    /// Return an entry to the free pool.  The handle (and any copies
    /// of it) become stale.
    pub fn kill(&mut self, handle: TimerHandle) -> Result<(), TimerError> {
        let i = self.index_of(handle)?;
        self.detach(i);
        {
            let slot = &mut self.slots[i as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.callout = None;
            slot.arg = 0;
            slot.interval = 0;
            slot.usec = 0;
            slot.deadline = 0;
            slot.residue = 0;
        }
        self.link_at_tail(i, TimerState::Free);
        event!(Level::TRACE, "killed timer {handle:?}");
        Ok(())
    }

    fn expire_head(&mut self, pool: Pool, fired: &mut Vec<Fired<C>>) {
        let p = pool as usize;
        if let Some(h) = self.pools[p].head {
            let slot = &mut self.slots[h as usize];
            slot.delta = slot.delta.saturating_sub(1);
        }
        while let Some(h) = self.pools[p].head {
            if self.slots[h as usize].delta != 0 {
                break;
            }
            self.detach(h);
            let residue = std::mem::take(&mut self.slots[h as usize].residue);
            if residue != 0 {
                self.insert_delta(h, residue, TimerState::ActiveSubTick);
                continue;
            }
            // Parked here while the callout runs.
            self.link_at_tail(h, TimerState::Quiescent(TimerKind::Countdown));
            if let Some(callout) = self.slots[h as usize].callout {
                fired.push(Fired {
                    handle: self.handle_of(h),
                    callout,
                    arg: self.slots[h as usize].arg,
                    every_interval: false,
                });
            }
        }
    }

    fn collect_expired(&mut self, fired: &mut Vec<Fired<C>>) {
        self.subtick_count += 1;
        self.expire_head(Pool::SubTick, fired);
        self.subtick_phase += 1;
        if self.subtick_phase >= self.subticks_per_interval {
            self.subtick_phase = 0;
            self.interval_count += 1;
            self.expire_head(Pool::MultiTick, fired);
            let mut cursor = self.pools[Pool::IntervalTick as usize].head;
            while let Some(c) = cursor {
                let slot = &self.slots[c as usize];
                if let Some(callout) = slot.callout {
                    fired.push(Fired {
                        handle: self.handle_of(c),
                        callout,
                        arg: slot.arg,
                        every_interval: true,
                    });
                }
                cursor = slot.next;
            }
        }
    }

    fn complete(&mut self, handle: TimerHandle, action: TimerAction) {
        let outcome = match action {
            TimerAction::NoOp => Ok(()),
            // Still parked in the quiescent pool unless the callout
            // moved it.
            TimerAction::Quiesce => self.quiesce(handle),
            TimerAction::Kill => self.kill(handle),
            TimerAction::Repeat => match self.state(handle) {
                Ok(TimerState::Quiescent(_)) => self.activate(handle),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            },
        };
        if let Err(e) = outcome {
            event!(
                Level::WARN,
                "timer callout returned {action:?} for an entry it had already disposed of: {e}"
            );
        }
    }

    /// Advance time by one sub-tick, running every callout which
    /// falls due.
    ///
    /// This is an associated function rather than a method because
    /// the callouts need mutable access to the scheduler's owner
    /// (which contains the scheduler).  `timers` locates the
    /// scheduler within its owner.
    pub fn advance(owner: &mut C, timers: fn(&mut C) -> &mut TimerScheduler<C>) {
        let mut fired = std::mem::take(&mut timers(owner).fired);
        timers(owner).collect_expired(&mut fired);
        for f in fired.iter() {
            // An earlier callout in this batch may have killed this
            // entry.
            if !timers(owner).is_live(f.handle) {
                continue;
            }
            let action = (f.callout)(owner, f.arg);
            if !f.every_interval {
                timers(owner).complete(f.handle, action);
            }
        }
        fired.clear();
        timers(owner).fired = fired;
    }

    /// Change the length of a sub-tick.  Every active countdown
    /// entry keeps the same remaining real time (to the resolution
    /// of the new tick length).
    pub fn set_usec_per_tick(&mut self, usec_per_tick: u64) -> Result<(), TimerError> {
        if usec_per_tick == 0 {
            return Err(TimerError::ZeroTickLength);
        }
        let old = self.usec_per_tick;
        let mut pending: Vec<(u32, u64)> = Vec::new();
        let mut sum = 0;
        let mut cursor = self.pools[Pool::SubTick as usize].head;
        while let Some(c) = cursor {
            sum += self.slots[c as usize].delta;
            pending.push((c, sum * old));
            cursor = self.slots[c as usize].next;
        }
        sum = 0;
        cursor = self.pools[Pool::MultiTick as usize].head;
        while let Some(c) = cursor {
            sum += self.slots[c as usize].delta;
            let subticks = (sum * self.subticks_per_interval + self.slots[c as usize].residue)
                .saturating_sub(self.subtick_phase);
            pending.push((c, subticks * old));
            cursor = self.slots[c as usize].next;
        }
        for (i, _) in pending.iter() {
            self.unlink(*i);
            self.slots[*i as usize].delta = 0;
        }
        self.usec_per_tick = usec_per_tick;
        for i in 0..self.slots.len() {
            let interval = match self.slots[i].state.kind() {
                None => continue,
                Some(TimerKind::EveryInterval) => self.subticks_per_interval,
                Some(TimerKind::Countdown) => self.ticks_for(self.slots[i].usec),
            };
            self.slots[i].interval = interval;
        }
        for (i, remaining_usec) in pending {
            let ticks = self.ticks_for(remaining_usec);
            self.schedule(i, ticks);
        }
        event!(
            Level::DEBUG,
            "tick length changed from {old}us to {usec_per_tick}us"
        );
        Ok(())
    }

    /// Verify that every entry is in exactly one pool, that the
    /// links are consistent, and that the deltas along each delta
    /// queue add up to each member's deadline.
    pub fn check_invariants(&self) -> Result<(), TimerError> {
        let corrupt = |msg: String| Err(TimerError::Corrupt(msg));
        let mut seen = vec![false; self.slots.len()];
        let mut total = 0;
        for pool in ALL_POOLS {
            let list = &self.pools[pool as usize];
            let base = match pool {
                Pool::SubTick => Some(self.subtick_count),
                Pool::MultiTick => Some(self.interval_count),
                _ => None,
            };
            let mut running = 0;
            let mut count = 0;
            let mut prev: Option<u32> = None;
            let mut cursor = list.head;
            while let Some(c) = cursor {
                let Some(slot) = self.slots.get(c as usize) else {
                    return corrupt(format!("{pool:?} pool links to missing entry {c}"));
                };
                if seen[c as usize] {
                    return corrupt(format!("entry {c} appears twice"));
                }
                seen[c as usize] = true;
                if slot.state.pool() != pool {
                    return corrupt(format!(
                        "entry {c} has state {:?} but is in the {pool:?} pool",
                        slot.state
                    ));
                }
                if slot.prev != prev {
                    return corrupt(format!("entry {c} has a bad back link"));
                }
                if let Some(base) = base {
                    if prev.is_none() && slot.delta == 0 {
                        return corrupt(format!("head of {pool:?} queue has expired"));
                    }
                    running += slot.delta;
                    if base + running != slot.deadline {
                        return corrupt(format!(
                            "entry {c} in {pool:?} queue is due at {} but the deltas add up to {}",
                            slot.deadline,
                            base + running
                        ));
                    }
                }
                count += 1;
                prev = cursor;
                cursor = slot.next;
            }
            if list.tail != prev {
                return corrupt(format!("{pool:?} pool has a bad tail"));
            }
            if list.len != count {
                return corrupt(format!(
                    "{pool:?} pool has {count} members but records {}",
                    list.len
                ));
            }
            total += count;
        }
        if total != self.slots.len() {
            return corrupt(format!(
                "{total} of {} entries are in a pool",
                self.slots.len()
            ));
        }
        Ok(())
    }
}
