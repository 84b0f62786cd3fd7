//! Backoff between provider fallback candidates.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff with configurable min/max. When `initial == max` the interval is fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial`, doubling up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Creates a backoff that always waits `interval`.
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval)
    }

    /// Returns the current backoff duration.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Advances to the next backoff interval (doubles, capped at max).
    pub fn next(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    /// Resets backoff to initial value.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Sleeps for the current interval, then advances.
    pub async fn wait(&mut self) {
        if !self.current.is_zero() {
            tokio::time::sleep(self.current).await;
        }
        self.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backoff_starts_at_initial() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn fixed_backoff_never_grows() {
        let mut backoff = Backoff::fixed(Duration::from_secs(1));
        backoff.next();
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn backoff_doubles_and_caps_at_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(3));
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_secs(2));
        backoff.next(); // 4 -> capped to 3
        assert_eq!(backoff.current(), Duration::from_secs(3));
    }

    #[test]
    fn max_below_initial_behaves_as_fixed() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_secs(5));
    }

    #[test]
    fn backoff_resets_to_initial() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        backoff.next();
        backoff.next();
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_then_advances() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        backoff.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(backoff.current(), Duration::from_millis(200));
    }
}
