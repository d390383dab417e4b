//! Store metrics: relaxed counters with a serializable snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StoreMetrics {
    /// Non-null `add` calls, deduplicated or not.
    pub adds_total: u64,
    /// `add` calls that found the value already interned.
    pub dedup_hits_total: u64,
    /// In-place row capacity growths.
    pub horizontal_growths_total: u64,
    /// Directory doublings.
    pub vertical_growths_total: u64,
    /// Operations abandoned at the caller's lock deadline.
    pub lock_timeouts_total: u64,
}

/// Live counters backing [`StoreMetrics`]. Updated with relaxed ordering;
/// the snapshot is advisory, never part of a correctness argument.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    adds: AtomicU64,
    dedup_hits: AtomicU64,
    horizontal_growths: AtomicU64,
    vertical_growths: AtomicU64,
    lock_timeouts: AtomicU64,
}

impl Counters {
    pub(crate) fn bump_adds(&self) {
        self.adds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_dedup_hits(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_horizontal_growths(&self) {
        self.horizontal_growths.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_vertical_growths(&self) {
        self.vertical_growths.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn bump_lock_timeouts(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreMetrics {
        StoreMetrics {
            adds_total: self.adds.load(Ordering::Relaxed),
            dedup_hits_total: self.dedup_hits.load(Ordering::Relaxed),
            horizontal_growths_total: self.horizontal_growths.load(Ordering::Relaxed),
            vertical_growths_total: self.vertical_growths.load(Ordering::Relaxed),
            lock_timeouts_total: self.lock_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let counters = Counters::default();
        counters.bump_adds();
        counters.bump_adds();
        counters.bump_dedup_hits();
        counters.bump_vertical_growths();
        let snap = counters.snapshot();
        assert_eq!(snap.adds_total, 2);
        assert_eq!(snap.dedup_hits_total, 1);
        assert_eq!(snap.horizontal_growths_total, 0);
        assert_eq!(snap.vertical_growths_total, 1);
        assert_eq!(snap.lock_timeouts_total, 0);
    }

    #[test]
    fn snapshot_serializes() {
        let snap = Counters::default().snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("adds_total"));
    }
}
