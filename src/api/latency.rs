//! In-memory latency histograms for the refresh pipeline.
//! Refreshers record fetch round-trips and analytics passes; the API reads percentiles.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Percentiles in microseconds. All None until the first sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
    pub max_us: Option<u64>,
}

/// One histogram. Values stored in microseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

impl LatencyStats {
    /// Tracks 1us to 100s, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let us = d.as_micros().clamp(1, 100_000_000) as u64;
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.record(us);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.inner.lock() else {
            return LatencySummary::default();
        };
        if h.len() == 0 {
            return LatencySummary::default();
        }
        LatencySummary {
            samples: h.len(),
            p50_us: Some(h.value_at_quantile(0.5)),
            p95_us: Some(h.value_at_quantile(0.95)),
            p99_us: Some(h.value_at_quantile(0.99)),
            max_us: Some(h.max()),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch and compute latency, shared by every refresher.
#[derive(Default)]
pub struct PipelineLatency {
    /// Snapshot fetch, including retries and session priming.
    pub fetch: LatencyStats,
    /// Analytics pass plus history append, under the chain lock.
    pub compute: LatencyStats,
}

impl PipelineLatency {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let stats = LatencyStats::new();
        assert_eq!(stats.summary(), LatencySummary::default());
    }

    #[test]
    fn percentiles_track_samples() {
        let stats = LatencyStats::new();
        for ms in 1..=100u64 {
            stats.record(Duration::from_millis(ms));
        }
        let s = stats.summary();
        assert_eq!(s.samples, 100);
        let p50 = s.p50_us.unwrap();
        assert!((49_000..=51_000).contains(&p50), "p50={p50}");
        assert!(s.p99_us.unwrap() >= s.p95_us.unwrap());
        // Zero-length durations are clamped into the histogram range.
        stats.record(Duration::ZERO);
        assert_eq!(stats.summary().samples, 101);
    }
}
