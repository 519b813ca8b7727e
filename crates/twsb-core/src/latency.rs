//! Histogram of ingest-to-publish latency.
//!
//! Each publisher worker owns a [`LatencyHistogram`] and records, for every
//! published event, the time between enqueue on the callback thread and the
//! Redis write completing. Statistics are logged periodically and the
//! histogram is reset.
//!
//! Bins are 50µs wide up to 250ms (5000 bins). Slower samples land in the
//! last bin; the exact maximum is tracked separately.

use std::time::Duration;

/// Width of each histogram bin in microseconds.
const BIN_WIDTH_US: u64 = 50;

/// Number of histogram bins (covers 0–250ms).
const NUM_BINS: usize = 5000;

/// Computed latency statistics.
#[derive(Debug, Clone, Copy)]
pub struct LatencyStats {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: f64,
    pub p50_us: u64,
    pub p99_us: u64,
}

impl std::fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} min={}µs max={}µs avg={:.1}µs p50={}µs p99={}µs",
            self.count, self.min_us, self.max_us, self.avg_us, self.p50_us, self.p99_us,
        )
    }
}

/// Fixed-bin latency histogram. Not thread-safe; one per worker.
pub struct LatencyHistogram {
    bins: Vec<u64>,
    count: u64,
    sum_us: u64,
    min_us: u64,
    max_us: u64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self { bins: vec![0u64; NUM_BINS], count: 0, sum_us: 0, min_us: u64::MAX, max_us: 0 }
    }

    /// Record one sample.
    #[inline]
    pub fn record(&mut self, latency: Duration) {
        let us = latency.as_micros().min(u64::MAX as u128) as u64;
        self.count += 1;
        self.sum_us = self.sum_us.saturating_add(us);
        self.min_us = self.min_us.min(us);
        self.max_us = self.max_us.max(us);
        let bin = ((us / BIN_WIDTH_US) as usize).min(NUM_BINS - 1);
        self.bins[bin] += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Summary statistics, or `None` if nothing was recorded.
    pub fn stats(&self) -> Option<LatencyStats> {
        if self.count == 0 {
            return None;
        }
        Some(LatencyStats {
            count: self.count,
            min_us: self.min_us,
            max_us: self.max_us,
            avg_us: self.sum_us as f64 / self.count as f64,
            p50_us: self.percentile(0.50),
            p99_us: self.percentile(0.99),
        })
    }

    pub fn reset(&mut self) {
        self.bins.fill(0);
        self.count = 0;
        self.sum_us = 0;
        self.min_us = u64::MAX;
        self.max_us = 0;
    }

    /// Lower edge of the bin holding the given percentile (0.0–1.0).
    fn percentile(&self, pct: f64) -> u64 {
        let target = ((self.count as f64 * pct).ceil() as u64).max(1);
        let mut cumulative = 0u64;
        for (i, &n) in self.bins.iter().enumerate() {
            cumulative += n;
            if cumulative >= target {
                return (i as u64) * BIN_WIDTH_US;
            }
        }
        self.max_us
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}
