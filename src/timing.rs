use std::time::{Duration, Instant};

/// Runs `f` and logs its duration when it exceeds `threshold_ms`.
pub fn measure_time<T>(label: &str, threshold_ms: f64, f: impl FnOnce() -> T) -> T {
    let _clock = Clock::start(label, threshold_ms);
    f()
}

/// Logs the elapsed time on drop if it exceeds the threshold.
pub struct Clock<'a> {
    label: &'a str,
    threshold_ms: f64,
    started: Instant,
}

impl<'a> Clock<'a> {
    pub fn start(label: &'a str, threshold_ms: f64) -> Self {
        Self {
            label,
            threshold_ms,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for Clock<'_> {
    fn drop(&mut self) {
        let ms = self.elapsed_ms();
        if ms > self.threshold_ms {
            log::info!("{} took {:.2} ms", self.label, ms);
        }
    }
}

/// Lets an action through at most once per `interval`.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns true and records `now` when the interval has elapsed.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_blocks_within_interval() {
        let mut t = Throttle::new(Duration::from_millis(10));
        let now = Instant::now();
        assert!(t.ready(now));
        assert!(!t.ready(now + Duration::from_millis(3)));
        assert!(t.ready(now + Duration::from_millis(10)));
    }

    #[test]
    fn zero_interval_never_blocks() {
        let mut t = Throttle::new(Duration::ZERO);
        let now = Instant::now();
        assert!(t.ready(now));
        assert!(t.ready(now));
    }
}
