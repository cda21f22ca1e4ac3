use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::{event, Level};

use kn10::Attention;

/// IdleSleeper waits for the attention flag while the guest has
/// nothing to do.  It sleeps in slices of `slice` so that it notices
/// the flag promptly without spinning.
///
/// # Examples
/// ```ignore
/// let mut s = IdleSleeper::new(Duration::from_micros(100));
/// s.idle(&attention, Duration::from_millis(10));
/// ```
#[derive(Debug)]
pub struct IdleSleeper {
    slice: Duration,
    total_idle: Duration,
    waits: u64,
}

impl IdleSleeper {
    pub fn new(slice: Duration) -> IdleSleeper {
        IdleSleeper {
            slice,
            total_idle: Duration::ZERO,
            waits: 0,
        }
    }

    /// Returns when `attention` is raised or `max_wait` has passed.
    pub fn idle(&mut self, attention: &Attention, max_wait: Duration) {
        let then = Instant::now();
        let deadline = then + max_wait;
        self.waits += 1;
        loop {
            if attention.is_raised() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.slice.min(deadline - now));
        }
        let slept_for = then.elapsed();
        self.total_idle += slept_for;
        event!(
            Level::TRACE,
            "IdleSleeper: idle for {:?} (limit {:?})",
            slept_for,
            max_wait
        );
    }

    pub fn total_idle(&self) -> Duration {
        self.total_idle
    }
}

impl Drop for IdleSleeper {
    fn drop(&mut self) {
        event!(
            Level::INFO,
            "IdleSleeper: drop: {} idle waits, total idle time {:?}",
            self.waits,
            self.total_idle
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_flag_returns_at_once() {
        let attention = Attention::new();
        attention.raise();
        let mut s = IdleSleeper::new(Duration::from_millis(1));
        s.idle(&attention, Duration::from_secs(60));
        assert!(s.total_idle() < Duration::from_secs(60));
    }

    #[test]
    fn waits_no_longer_than_asked() {
        let attention = Attention::new();
        let mut s = IdleSleeper::new(Duration::from_millis(1));
        s.idle(&attention, Duration::from_millis(5));
        assert!(s.total_idle() >= Duration::from_millis(5));
    }
}
