//! Exponential backoff with jitter.
//!
//! Shared by publisher retries (bounded by an attempt budget) and supervisor
//! reconnects (unbounded). The delay for attempt `n` (0-based) is
//! `initial * multiplier^n`, capped at `max`, then spread by ±`jitter`
//! so workers and bridges do not retry in lockstep, and capped at `max`
//! again.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Relative jitter in `[0, 1]`; 0.2 means ±20%.
    pub jitter: f64,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, jitter: f64) -> Self {
        Self { initial, max, multiplier: 2.0, jitter: jitter.clamp(0.0, 1.0) }
    }

    /// Un-jittered delay for attempt `n`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max_ms = self.max.as_millis() as f64;
        let exp = self.multiplier.powi(attempt.min(64) as i32);
        let ms = (self.initial.as_millis() as f64 * exp).min(max_ms);
        Duration::from_millis(ms as u64)
    }

    /// Jittered delay for attempt `n`, never above `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as f64;
        let spread = base_ms * self.jitter;
        let jittered = if spread > 0.0 {
            rand::rng().random_range((base_ms - spread).max(0.0)..=base_ms + spread)
        } else {
            base_ms
        };
        Duration::from_millis(jittered as u64).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_doubles_until_cap() {
        let p = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1_000), 0.0);
        assert_eq!(p.base_delay(0), Duration::from_millis(100));
        assert_eq!(p.base_delay(1), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(800));
        assert_eq!(p.base_delay(4), Duration::from_millis(1_000));
        assert_eq!(p.base_delay(1_000), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_in_band_and_under_cap() {
        let p = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(500), 0.2);
        for _ in 0..200 {
            let d = p.delay(1).as_millis();
            assert!((160..=240).contains(&d), "delay {d} out of band");
            assert!(p.delay(10) <= Duration::from_millis(500));
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let p = BackoffPolicy::new(Duration::from_millis(50), Duration::from_secs(2), 0.0);
        assert_eq!(p.delay(2), Duration::from_millis(200));
    }
}
