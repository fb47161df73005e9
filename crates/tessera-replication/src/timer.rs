//! Fixed-interval gate driven by the tick's elapsed time.

use std::time::Duration;

/// Fires once per `interval` of accumulated tick time.
///
/// Leftover time is discarded when it fires, so a long tick never fires
/// twice in a row.
#[derive(Debug, Clone)]
pub struct IntervalTimer {
    interval: Duration,
    elapsed: Duration,
}

impl IntervalTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed: Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Advances by `dt`. Returns `true` and restarts when the interval is
    /// reached.
    pub fn tick(&mut self, dt: Duration) -> bool {
        self.elapsed += dt;
        if self.elapsed >= self.interval {
            self.elapsed = Duration::ZERO;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_on_interval() {
        let mut timer = IntervalTimer::new(Duration::from_millis(50));
        assert!(!timer.tick(Duration::from_millis(20)));
        assert!(!timer.tick(Duration::from_millis(20)));
        assert!(timer.tick(Duration::from_millis(20)));
        assert!(!timer.tick(Duration::from_millis(20)));
    }

    #[test]
    fn test_long_tick_fires_once() {
        let mut timer = IntervalTimer::new(Duration::from_millis(50));
        assert!(timer.tick(Duration::from_millis(500)));
        assert!(!timer.tick(Duration::from_millis(1)));
    }

    #[test]
    fn test_reset() {
        let mut timer = IntervalTimer::new(Duration::from_millis(50));
        timer.tick(Duration::from_millis(40));
        timer.reset();
        assert!(!timer.tick(Duration::from_millis(40)));
    }
}
