//! Counters a host program folds into its own metrics exporter. Mirrors
//! `dns-resolver::metrics::Metrics`: a plain accumulator the engine updates,
//! not a built-in exporter.

use std::sync::atomic::{AtomicU64, Ordering};

/// Admission, rate-limiting and lifecycle counters, shared via `Arc` between
/// the security pipeline and a responder's lifecycle tasks.
#[derive(Debug, Default)]
pub struct Metrics {
    admitted: AtomicU64,
    dropped: AtomicU64,
    rate_limited: AtomicU64,
    conflicts: AtomicU64,
    renames: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rename(&self) {
        self.renames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    pub fn renames(&self) -> u64 {
        self.renames.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.admitted(), 0);
        metrics.record_admitted();
        metrics.record_admitted();
        metrics.record_conflict();
        assert_eq!(metrics.admitted(), 2);
        assert_eq!(metrics.conflicts(), 1);
        assert_eq!(metrics.renames(), 0);
    }
}
