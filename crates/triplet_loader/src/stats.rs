//! Counters for pipeline events that would otherwise pass silently.
//!
//! Skipped chunks and truncated cache streams are not errors, but they change
//! how much data an epoch actually delivers, so every occurrence is counted
//! here in addition to being logged.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    chunks_read: AtomicUsize,
    chunks_skipped: AtomicUsize,
    records_read: AtomicUsize,
    batches_built: AtomicUsize,
    cache_truncations: AtomicUsize,
}

/// Shared, cheaply clonable handle to the pipeline counters.
#[derive(Debug, Clone, Default)]
pub struct LoaderStats {
    inner: Arc<Counters>,
}

/// Point-in-time copy of [`LoaderStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub chunks_read: usize,
    pub chunks_skipped: usize,
    pub records_read: usize,
    pub batches_built: usize,
    pub cache_truncations: usize,
}

impl LoaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_chunk(&self, records: usize) {
        self.inner.chunks_read.fetch_add(1, Ordering::Relaxed);
        self.inner.records_read.fetch_add(records, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_chunk(&self) {
        self.inner.chunks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_batch(&self) {
        self.inner.batches_built.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_truncation(&self) {
        self.inner.cache_truncations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            chunks_read: self.inner.chunks_read.load(Ordering::Relaxed),
            chunks_skipped: self.inner.chunks_skipped.load(Ordering::Relaxed),
            records_read: self.inner.records_read.load(Ordering::Relaxed),
            batches_built: self.inner.batches_built.load(Ordering::Relaxed),
            cache_truncations: self.inner.cache_truncations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let stats = LoaderStats::new();
        let handle = stats.clone();

        handle.record_chunk(10);
        handle.record_chunk(4);
        handle.record_skipped_chunk();
        stats.record_batch();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.chunks_read, 2);
        assert_eq!(snapshot.records_read, 14);
        assert_eq!(snapshot.chunks_skipped, 1);
        assert_eq!(snapshot.batches_built, 1);
        assert_eq!(snapshot.cache_truncations, 0);
    }
}
