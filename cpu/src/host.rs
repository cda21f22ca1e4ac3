//! The boundary between the emulator and the host operating system.
//!
//! The instruction loop is single-threaded.  The only state it shares
//! with anything else is the attention flag (which says "stop at the
//! next instruction boundary and look around") and, in the host
//! interrupt tick model, a counter of host timer ticks which have not
//! yet been applied.  A host timer thread is given a [`Ticker`] and
//! does nothing but bump the counter and raise the flag.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The "needs attention" flag.  Cloning it produces another reference
/// to the same flag.
#[derive(Debug, Clone, Default)]
pub struct Attention(Arc<AtomicBool>);

impl Attention {
    pub fn new() -> Attention {
        Attention::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Given to a host interval timer; each call to [`Ticker::tick`]
/// records one elapsed scheduler tick.
#[derive(Debug, Clone)]
pub struct Ticker {
    ticks: Arc<AtomicU32>,
    attention: Attention,
}

impl Ticker {
    pub(crate) fn new(ticks: Arc<AtomicU32>, attention: Attention) -> Ticker {
        Ticker { ticks, attention }
    }

    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::AcqRel);
        self.attention.raise();
    }

    /// The flag a host idle wait should watch.
    pub fn attention(&self) -> &Attention {
        &self.attention
    }
}

#[derive(Debug)]
pub enum HostError {
    /// The machine counts instructions, so there is nothing for a
    /// host clock to do.
    WrongTickModel,
    /// The host could not start its timer.
    TimerUnavailable(String),
}

impl Display for HostError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            HostError::WrongTickModel => f.write_str(
                "the machine uses the counting tick model, so it cannot be driven by a host clock",
            ),
            HostError::TimerUnavailable(why) => {
                write!(f, "failed to start host interval timer: {why}")
            }
        }
    }
}

impl Error for HostError {}

/// The services the emulator needs from the host operating system.
pub trait HostSupport {
    /// Monotonic host time.
    fn now(&self) -> Duration;

    /// Arrange for `ticker.tick()` to be called every `period`.
    fn start_interval_timer(&mut self, period: Duration, ticker: Ticker) -> Result<(), HostError>;

    /// Wait until the attention flag is raised or `max_wait` has
    /// passed.
    fn idle_until_event(&mut self, attention: &Attention, max_wait: Duration);
}

#[test]
fn ticker_raises_attention() {
    let attention = Attention::new();
    let ticks = Arc::new(AtomicU32::new(0));
    let ticker = Ticker::new(Arc::clone(&ticks), attention.clone());
    assert!(!attention.is_raised());
    ticker.tick();
    ticker.tick();
    assert!(attention.is_raised());
    assert_eq!(ticks.load(Ordering::Acquire), 2);
}
