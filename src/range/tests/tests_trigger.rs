//! Compaction trigger: firing conditions and the reset that re-arms it.

#[cfg(test)]
mod tests {
    use crate::compact::CompactionScheduler;
    use crate::range::KeyRange;
    use crate::store::lsm::{LsmStore, StoreOptions};
    use crate::store::{DEFAULT_NAMESPACE, LeafStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn scheduler(tmp: &TempDir) -> Arc<CompactionScheduler> {
        let store: Arc<dyn LeafStore> = Arc::new(
            LsmStore::open(
                tmp.path(),
                &[DEFAULT_NAMESPACE.to_string()],
                StoreOptions::default(),
            )
            .unwrap(),
        );
        Arc::new(CompactionScheduler::new(store))
    }

    fn range_with(
        scheduler: &Arc<CompactionScheduler>,
        min_tombstones: u64,
        percent: f64,
    ) -> KeyRange {
        KeyRange::new(
            1,
            DEFAULT_NAMESPACE.to_string(),
            None,
            None,
            Arc::clone(scheduler),
            min_tombstones,
            percent,
        )
    }

    #[test]
    fn range_delete_fires_immediately() {
        let tmp = TempDir::new().unwrap();
        let scheduler = scheduler(&tmp);
        scheduler.start();
        let range = range_with(&scheduler, 1_000_000, 0.99);

        range.record_insert(1);
        range.record_delete_range(1);
        range.end_batch(1);

        // Firing resets all three aggregates.
        assert_eq!(range.counters(), (0, 0, 0));
        scheduler.drain();
        assert_eq!(scheduler.stats().completed, 1);
    }

    #[test]
    fn tombstone_ratio_fires_above_both_thresholds() {
        let tmp = TempDir::new().unwrap();
        let scheduler = scheduler(&tmp);
        scheduler.start();
        let range = range_with(&scheduler, 2, 0.5);

        // Three deletes against three inserts: t = 3 > 2 and ratio = 0.5.
        range.record_insert(1);
        range.record_insert(1);
        range.record_insert(1);
        range.end_batch(1);
        assert_eq!(range.counters(), (3, 0, 0));

        range.record_delete(2);
        range.record_delete(2);
        range.record_delete(2);
        range.end_batch(2);

        assert_eq!(range.counters(), (0, 0, 0));
        scheduler.drain();
        assert_eq!(scheduler.stats().completed, 1);
    }

    #[test]
    fn below_minimum_tombstones_never_fires() {
        let tmp = TempDir::new().unwrap();
        let scheduler = scheduler(&tmp);
        scheduler.start();
        let range = range_with(&scheduler, 10, 0.1);

        range.record_delete(1);
        range.record_delete(1);
        range.end_batch(1);

        assert_eq!(range.counters(), (0, 2, 0));
        scheduler.drain();
        assert_eq!(scheduler.stats().completed, 0);
    }

    #[test]
    fn below_ratio_never_fires() {
        let tmp = TempDir::new().unwrap();
        let scheduler = scheduler(&tmp);
        scheduler.start();
        let range = range_with(&scheduler, 2, 0.9);

        range.record_insert(1);
        range.record_insert(1);
        range.record_insert(1);
        range.record_delete(1);
        range.record_delete(1);
        range.record_delete(1);
        range.end_batch(1);

        // t/(t+k) = 0.5 < 0.9: counters keep accruing.
        assert_eq!(range.counters(), (3, 3, 0));
        scheduler.drain();
        assert_eq!(scheduler.stats().completed, 0);
    }

    #[test]
    fn trigger_rearms_after_reset() {
        let tmp = TempDir::new().unwrap();
        let scheduler = scheduler(&tmp);
        scheduler.start();
        let range = range_with(&scheduler, 1_000_000, 0.99);

        range.record_delete_range(1);
        range.end_batch(1);
        assert_eq!(range.counters(), (0, 0, 0));

        // New batches accrue from zero and can fire again.
        range.record_insert(2);
        range.end_batch(2);
        assert_eq!(range.counters(), (1, 0, 0));

        range.record_delete_range(3);
        range.end_batch(3);
        assert_eq!(range.counters(), (0, 0, 0));
    }

    #[test]
    fn hints_against_unstarted_scheduler_are_dropped() {
        let tmp = TempDir::new().unwrap();
        let scheduler = scheduler(&tmp);
        let range = range_with(&scheduler, 1_000_000, 0.99);

        range.record_delete_range(1);
        range.end_batch(1);

        // The counters still reset, but no work was queued.
        assert_eq!(range.counters(), (0, 0, 0));
        assert_eq!(scheduler.pending_hints(), 0);
        assert_eq!(scheduler.stats().completed, 0);
    }
}
