use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Monotonic time source for tick pacing and experiment time.
///
/// - now(): monotonic Instant
/// - sleep(): wait for the provided duration (manual clocks just advance)
/// - hours_since(): experiment time in hours, the unit every log is stamped in
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let ms = self.now().saturating_duration_since(epoch).as_millis();
        u64::try_from(ms).unwrap_or(u64::MAX)
    }

    /// Hours elapsed since `epoch`.
    fn hours_since(&self, epoch: Instant) -> f64 {
        self.ms_since(epoch) as f64 / MS_PER_HOUR
    }
}

/// Wall-clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Clock whose time only moves when someone sleeps on it or advances it.
///
/// Clones share the same offset, so a simulator and the sampler thread
/// pacing it observe one timeline. An experiment that would take days runs
/// as fast as the ticks can be computed.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    /// Time elapsed on this clock since it was created.
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let a = ManualClock::new();
        let b = a.clone();
        let epoch = a.now();
        b.sleep(Duration::from_secs(1800));
        assert_eq!(a.ms_since(epoch), 1_800_000);
        assert!((a.hours_since(epoch) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn ms_since_saturates_for_future_epoch() {
        let c = ManualClock::new();
        let future = c.now() + Duration::from_secs(5);
        assert_eq!(c.ms_since(future), 0);
    }
}
