//! Host services for the emulator: a monotonic clock, an interval
//! timer thread and idle waits.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{event, Level};

use kn10::{Attention, HostError, HostSupport, Ticker};

use crate::sleep::IdleSleeper;

/// ThreadHost runs the host interval timer on its own thread.  That
/// thread only ever calls [`Ticker::tick`]; everything else happens
/// on the emulator's thread at its next synchronization point.
#[derive(Debug)]
pub struct ThreadHost {
    origin: Instant,
    stop: Arc<AtomicBool>,
    ticker_thread: Option<JoinHandle<()>>,
    sleeper: IdleSleeper,
}

impl ThreadHost {
    pub fn new() -> ThreadHost {
        ThreadHost {
            origin: Instant::now(),
            stop: Arc::new(AtomicBool::new(false)),
            ticker_thread: None,
            sleeper: IdleSleeper::new(Duration::from_micros(100)),
        }
    }

    /// Total host time spent waiting for the guest to have work.
    pub fn idle_time(&self) -> Duration {
        self.sleeper.total_idle()
    }
}

impl Default for ThreadHost {
    fn default() -> Self {
        Self::new()
    }
}

fn tick_periodically(period: Duration, ticker: Ticker, stop: Arc<AtomicBool>) {
    let mut next = Instant::now() + period;
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < next {
            thread::sleep(next - now);
        }
        ticker.tick();
        next += period;
        // If we fell a long way behind (the host was suspended, say)
        // don't try to catch up with a burst of ticks.
        let now = Instant::now();
        if next + period * 100 < now {
            event!(
                Level::WARN,
                "host interval timer fell behind by {:?}, skipping ahead",
                now - next
            );
            next = now + period;
        }
    }
}

impl HostSupport for ThreadHost {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn start_interval_timer(&mut self, period: Duration, ticker: Ticker) -> Result<(), HostError> {
        if self.ticker_thread.is_some() {
            return Err(HostError::TimerUnavailable(
                "the interval timer is already running".to_string(),
            ));
        }
        if period.is_zero() {
            return Err(HostError::TimerUnavailable(
                "the interval timer period is zero".to_string(),
            ));
        }
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("kn10-interval-timer".to_string())
            .spawn(move || tick_periodically(period, ticker, stop))
            .map_err(|e| HostError::TimerUnavailable(e.to_string()))?;
        event!(Level::INFO, "host interval timer started, period {:?}", period);
        self.ticker_thread = Some(handle);
        Ok(())
    }

    fn idle_until_event(&mut self, attention: &Attention, max_wait: Duration) {
        self.sleeper.idle(attention, max_wait);
    }
}

impl Drop for ThreadHost {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.ticker_thread.take() {
            if handle.join().is_err() {
                event!(Level::ERROR, "host interval timer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kn10::{Kn10, MachineConfiguration, TickModel};

    #[test]
    fn interval_timer_raises_attention() {
        let kn = Kn10::new(MachineConfiguration {
            tick_model: TickModel::HostInterrupt,
            usec_per_tick: 100,
            memory_words: 0o100_000,
            ..MachineConfiguration::default()
        })
        .expect("configuration should be valid");
        let mut host = ThreadHost::new();
        kn.start_host_clock(&mut host)
            .expect("host clock should start");
        let attention = kn.attention();
        host.idle_until_event(&attention, Duration::from_secs(5));
        assert!(attention.is_raised());
    }

    #[test]
    fn only_one_interval_timer() {
        let kn = Kn10::new(MachineConfiguration {
            tick_model: TickModel::HostInterrupt,
            memory_words: 0o100_000,
            ..MachineConfiguration::default()
        })
        .expect("configuration should be valid");
        let mut host = ThreadHost::new();
        host.start_interval_timer(Duration::from_millis(1), kn.host_ticker())
            .expect("first timer should start");
        assert!(matches!(
            host.start_interval_timer(Duration::from_millis(1), kn.host_ticker()),
            Err(HostError::TimerUnavailable(_))
        ));
    }
}
