//! Counter accounting across batches: fold on commit, drop on abort.

#[cfg(test)]
mod tests {
    use crate::compact::CompactionScheduler;
    use crate::range::KeyRange;
    use crate::store::lsm::{LsmStore, StoreOptions};
    use crate::store::{DEFAULT_NAMESPACE, LeafStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_range(tmp: &TempDir, min_tombstones: u64, percent: f64) -> KeyRange {
        let store: Arc<dyn LeafStore> = Arc::new(
            LsmStore::open(
                tmp.path(),
                &[DEFAULT_NAMESPACE.to_string()],
                StoreOptions::default(),
            )
            .unwrap(),
        );
        let scheduler = Arc::new(CompactionScheduler::new(store));
        KeyRange::new(
            1,
            DEFAULT_NAMESPACE.to_string(),
            None,
            None,
            scheduler,
            min_tombstones,
            percent,
        )
    }

    #[test]
    fn committed_batch_folds_into_aggregates() {
        let tmp = TempDir::new().unwrap();
        let range = test_range(&tmp, 1_000_000, 0.99);

        range.record_insert(1);
        range.record_insert(1);
        range.record_delete(1);
        // Deltas are invisible until the batch ends.
        assert_eq!(range.counters(), (0, 0, 0));

        range.end_batch(1);
        assert_eq!(range.counters(), (2, 1, 0));
    }

    #[test]
    fn put_counts_as_key_and_tombstone() {
        let tmp = TempDir::new().unwrap();
        let range = test_range(&tmp, 1_000_000, 0.99);

        range.record_put(1);
        range.record_put(1);
        range.end_batch(1);
        assert_eq!(range.counters(), (2, 2, 0));
    }

    #[test]
    fn aborted_batch_contributes_zero() {
        let tmp = TempDir::new().unwrap();
        let range = test_range(&tmp, 1_000_000, 0.99);

        range.record_put(1);
        range.record_delete(1);
        range.abort_batch(1);
        assert_eq!(range.counters(), (0, 0, 0));

        // A later batch still accounts normally.
        range.record_insert(2);
        range.end_batch(2);
        assert_eq!(range.counters(), (1, 0, 0));
    }

    #[test]
    fn batches_accumulate_independently() {
        let tmp = TempDir::new().unwrap();
        let range = test_range(&tmp, 1_000_000, 0.99);

        range.record_insert(1);
        range.record_insert(2);
        range.record_delete(2);
        range.end_batch(1);
        assert_eq!(range.counters(), (1, 0, 0));

        range.end_batch(2);
        assert_eq!(range.counters(), (2, 1, 0));
    }

    #[test]
    fn ending_an_unknown_batch_is_harmless() {
        let tmp = TempDir::new().unwrap();
        let range = test_range(&tmp, 1_000_000, 0.99);
        range.end_batch(42);
        assert_eq!(range.counters(), (0, 0, 0));
    }

    #[test]
    fn contains_respects_half_open_bounds() {
        let tmp = TempDir::new().unwrap();
        let store: Arc<dyn LeafStore> = Arc::new(
            LsmStore::open(
                tmp.path(),
                &[DEFAULT_NAMESPACE.to_string()],
                StoreOptions::default(),
            )
            .unwrap(),
        );
        let scheduler = Arc::new(CompactionScheduler::new(store));
        let range = KeyRange::new(
            1,
            DEFAULT_NAMESPACE.to_string(),
            Some(b"b".to_vec()),
            Some(b"d".to_vec()),
            scheduler,
            1_000_000,
            0.99,
        );

        assert!(!range.contains(b"a"));
        assert!(range.contains(b"b"));
        assert!(range.contains(b"c"));
        assert!(!range.contains(b"d"));
    }
}
