//! Hit/miss counters for the interception cache.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts cacheable requests and how many of them were served locally.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    total: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request that was eligible for caching.
    pub fn record_request(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Hit rate in percent; `0.0` before any request.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 * 100.0 / total as f64
    }

    /// Emit the periodic status line.
    pub fn report(&self) {
        tracing::info!(
            "Cache hit rate {}/{}, {:.2}%",
            self.hits(),
            self.total(),
            self.hit_rate()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_report_zero_rate() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn hit_rate_is_a_percentage() {
        let stats = CacheStats::new();
        for _ in 0..4 {
            stats.record_request();
        }
        stats.record_hit();
        assert_eq!(stats.hits(), 1);
        assert_eq!(stats.total(), 4);
        assert!((stats.hit_rate() - 25.0).abs() < f64::EPSILON);
    }
}
