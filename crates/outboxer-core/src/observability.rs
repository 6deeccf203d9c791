use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Snapshot of what a publisher has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherStats {
    pub published: u64,
    pub already_published: u64,
    pub failed: u64,
    pub swept: u64,
}

/// Shared counters behind `PublisherStats`.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    published: AtomicU64,
    already_published: AtomicU64,
    failed: AtomicU64,
    swept: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_already_published(&self) {
        self.already_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swept(&self, dispatched: u64) {
        self.swept.fetch_add(dispatched, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PublisherStats {
        PublisherStats {
            published: self.published.load(Ordering::Relaxed),
            already_published: self.already_published.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            swept: self.swept.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = StatsCounters::default();
        counters.record_published();
        counters.record_published();
        counters.record_failed();
        counters.record_swept(3);

        let stats = counters.snapshot();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.already_published, 0);
        assert_eq!(stats.swept, 3);
    }
}
