//! Store-level behavior: batches, reads, scans, flush, recovery, and
//! range compaction.

#[cfg(test)]
mod tests {
    use crate::store::lsm::{LsmStore, StoreOptions};
    use crate::store::{CompactOptions, DEFAULT_NAMESPACE, LeafStore, StoreError, WriteOp};
    use tempfile::TempDir;

    fn namespaces() -> Vec<String> {
        vec![DEFAULT_NAMESPACE.to_string(), "m".to_string()]
    }

    fn open(tmp: &TempDir) -> LsmStore {
        LsmStore::open(tmp.path(), &namespaces(), StoreOptions::default()).unwrap()
    }

    fn put(ns: &str, key: &[u8], value: &[u8]) -> WriteOp {
        WriteOp::Put {
            ns: ns.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    fn delete(ns: &str, key: &[u8]) -> WriteOp {
        WriteOp::Delete {
            ns: ns.to_string(),
            key: key.to_vec(),
        }
    }

    // ----------------------------------------------------------------
    // Open & namespaces
    // ----------------------------------------------------------------

    #[test]
    fn default_namespace_must_come_first() {
        let tmp = TempDir::new().unwrap();
        let result = LsmStore::open(
            tmp.path(),
            &["m".to_string(), DEFAULT_NAMESPACE.to_string()],
            StoreOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        assert!(matches!(
            store.get("nope", b"k"),
            Err(StoreError::UnknownNamespace(_))
        ));
        assert!(store.write_batch(vec![put("nope", b"k", b"v")]).is_err());
    }

    #[test]
    fn identity_file_written_once() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        let identity = std::fs::read_to_string(tmp.path().join("IDENTITY")).unwrap();
        assert!(!identity.trim().is_empty());
        drop(store);

        let _store = open(&tmp);
        let again = std::fs::read_to_string(tmp.path().join("IDENTITY")).unwrap();
        assert_eq!(identity, again);
    }

    // ----------------------------------------------------------------
    // Batches & point reads
    // ----------------------------------------------------------------

    #[test]
    fn batch_put_get_across_namespaces() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store
            .write_batch(vec![
                put(DEFAULT_NAMESPACE, b"k", b"dflt"),
                put("m", b"k", b"meta"),
            ])
            .unwrap();

        assert_eq!(
            store.get(DEFAULT_NAMESPACE, b"k").unwrap(),
            Some(b"dflt".to_vec())
        );
        assert_eq!(store.get("m", b"k").unwrap(), Some(b"meta".to_vec()));
        assert_eq!(store.get("m", b"missing").unwrap(), None);
    }

    #[test]
    fn overwrite_returns_latest() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store.write_batch(vec![put("m", b"k", b"v1")]).unwrap();
        store.write_batch(vec![put("m", b"k", b"v2")]).unwrap();
        assert_eq!(store.get("m", b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn single_delete_then_put_in_one_batch() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store.write_batch(vec![put("m", b"k", b"v1")]).unwrap();
        store
            .write_batch(vec![
                WriteOp::SingleDelete {
                    ns: "m".to_string(),
                    key: b"k".to_vec(),
                },
                put("m", b"k", b"v2"),
            ])
            .unwrap();
        assert_eq!(store.get("m", b"k").unwrap(), Some(b"v2".to_vec()));
    }

    #[test]
    fn delete_hides_key() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store.write_batch(vec![put("m", b"k", b"v")]).unwrap();
        store.write_batch(vec![delete("m", b"k")]).unwrap();
        assert_eq!(store.get("m", b"k").unwrap(), None);
    }

    #[test]
    fn delete_range_hides_interval() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store
            .write_batch(vec![
                put("m", b"a", b"1"),
                put("m", b"b", b"2"),
                put("m", b"c", b"3"),
            ])
            .unwrap();
        store
            .write_batch(vec![WriteOp::DeleteRange {
                ns: "m".to_string(),
                start: b"a".to_vec(),
                end: b"c".to_vec(),
            }])
            .unwrap();

        assert_eq!(store.get("m", b"a").unwrap(), None);
        assert_eq!(store.get("m", b"b").unwrap(), None);
        assert_eq!(store.get("m", b"c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn write_after_range_delete_is_visible() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store
            .write_batch(vec![WriteOp::DeleteRange {
                ns: "m".to_string(),
                start: b"a".to_vec(),
                end: b"z".to_vec(),
            }])
            .unwrap();
        store.write_batch(vec![put("m", b"k", b"fresh")]).unwrap();
        assert_eq!(store.get("m", b"k").unwrap(), Some(b"fresh".to_vec()));
    }

    #[test]
    fn may_exist_is_superset_of_truth() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store.write_batch(vec![put("m", b"present", b"v")]).unwrap();
        assert!(store.may_exist("m", b"present").unwrap());
    }

    // ----------------------------------------------------------------
    // Recovery
    // ----------------------------------------------------------------

    #[test]
    fn log_replay_recovers_unflushed_writes() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open(&tmp);
            store.write_batch(vec![put("m", b"k", b"v")]).unwrap();
            // Dropped without close: data only in the log.
        }
        let store = open(&tmp);
        assert_eq!(store.get("m", b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn flush_then_reopen_reads_from_runs() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open(&tmp);
            store.write_batch(vec![put("m", b"k", b"v")]).unwrap();
            store.flush(true).unwrap();
        }
        let store = open(&tmp);
        assert_eq!(store.get("m", b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn deletes_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open(&tmp);
            store.write_batch(vec![put("m", b"k", b"v")]).unwrap();
            store.flush(true).unwrap();
            store.write_batch(vec![delete("m", b"k")]).unwrap();
        }
        let store = open(&tmp);
        assert_eq!(store.get("m", b"k").unwrap(), None);
    }

    #[test]
    fn close_flushes_everything() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open(&tmp);
            store.write_batch(vec![put("m", b"k", b"v")]).unwrap();
            store.close().unwrap();
            // Idempotent.
            store.close().unwrap();
        }
        let store = open(&tmp);
        assert_eq!(store.get("m", b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn disabled_log_loses_unflushed_but_keeps_flushed() {
        let tmp = TempDir::new().unwrap();
        let options = StoreOptions {
            disable_wal: true,
            ..StoreOptions::default()
        };
        {
            let store = LsmStore::open(tmp.path(), &namespaces(), options.clone()).unwrap();
            store.write_batch(vec![put("m", b"kept", b"v")]).unwrap();
            store.flush(true).unwrap();
            store.write_batch(vec![put("m", b"lost", b"v")]).unwrap();
        }
        let store = LsmStore::open(tmp.path(), &namespaces(), options).unwrap();
        assert_eq!(store.get("m", b"kept").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.get("m", b"lost").unwrap(), None);
    }

    // ----------------------------------------------------------------
    // Iterators
    // ----------------------------------------------------------------

    #[test]
    fn iterator_walks_bounds_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        for key in [b"a", b"b", b"c", b"d"] {
            store.write_batch(vec![put("m", key, b"v")]).unwrap();
        }
        // Mix layers: half the data flushed, half in the memtable.
        store.flush(true).unwrap();
        store.write_batch(vec![put("m", b"e", b"v")]).unwrap();

        let mut iter = store.iterator("m", Some(b"b"), Some(b"e")).unwrap();
        assert!(iter.seek_first().unwrap());
        assert_eq!(iter.key(), b"b");
        assert!(iter.next().unwrap());
        assert_eq!(iter.key(), b"c");
        assert!(iter.next().unwrap());
        assert_eq!(iter.key(), b"d");
        assert!(!iter.next().unwrap());
        assert!(!iter.is_valid());

        assert!(iter.seek_last().unwrap());
        assert_eq!(iter.key(), b"d");
        assert!(iter.prev().unwrap());
        assert_eq!(iter.key(), b"c");

        assert!(iter.seek(b"c").unwrap());
        assert_eq!(iter.key(), b"c");
        assert!(iter.seek_for_prev(b"cc").unwrap());
        assert_eq!(iter.key(), b"c");
    }

    #[test]
    fn iterator_skips_deleted_keys() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store
            .write_batch(vec![
                put("m", b"a", b"1"),
                put("m", b"b", b"2"),
                put("m", b"c", b"3"),
            ])
            .unwrap();
        store.flush(true).unwrap();
        store.write_batch(vec![delete("m", b"b")]).unwrap();

        let mut iter = store.iterator("m", None, None).unwrap();
        let mut keys = Vec::new();
        let mut valid = iter.seek_first().unwrap();
        while valid {
            keys.push(iter.key().to_vec());
            valid = iter.next().unwrap();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn refresh_observes_later_writes() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store.write_batch(vec![put("m", b"a", b"1")]).unwrap();
        let mut iter = store.iterator("m", None, None).unwrap();
        store.write_batch(vec![put("m", b"b", b"2")]).unwrap();

        assert!(iter.seek(b"b").is_ok_and(|found| !found));
        iter.refresh().unwrap();
        assert!(iter.seek(b"b").unwrap());
    }

    // ----------------------------------------------------------------
    // Sizes & compaction
    // ----------------------------------------------------------------

    #[test]
    fn approximate_size_covers_memtable_and_runs() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store
            .write_batch(vec![put("m", b"a", &[0u8; 512])])
            .unwrap();
        let mem_only = store.approximate_size("m", None, None).unwrap();
        assert!(mem_only >= 512);

        store.flush(true).unwrap();
        store
            .write_batch(vec![put("m", b"b", &[0u8; 256])])
            .unwrap();
        let both = store.approximate_size("m", None, None).unwrap();
        assert!(both > mem_only);
    }

    #[test]
    fn compact_range_merges_runs_and_drops_tombstones() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        for i in 0..10u32 {
            store
                .write_batch(vec![put("m", format!("key_{i:02}").as_bytes(), b"v")])
                .unwrap();
            store.flush(true).unwrap();
        }
        for i in 0..5u32 {
            store
                .write_batch(vec![delete("m", format!("key_{i:02}").as_bytes())])
                .unwrap();
        }

        let before = store.approximate_size("m", None, None).unwrap();
        store
            .compact_range("m", None, None, CompactOptions::default())
            .unwrap();
        let after = store.approximate_size("m", None, None).unwrap();
        assert!(after < before);

        for i in 0..5u32 {
            let key = format!("key_{i:02}");
            assert_eq!(store.get("m", key.as_bytes()).unwrap(), None);
        }
        for i in 5..10u32 {
            let key = format!("key_{i:02}");
            assert_eq!(store.get("m", key.as_bytes()).unwrap(), Some(b"v".to_vec()));
        }
    }

    #[test]
    fn compact_range_applies_range_tombstones() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);

        store
            .write_batch(vec![
                put("m", b"a", b"1"),
                put("m", b"b", b"2"),
                put("m", b"z", b"3"),
            ])
            .unwrap();
        store.flush(true).unwrap();
        store
            .write_batch(vec![WriteOp::DeleteRange {
                ns: "m".to_string(),
                start: b"a".to_vec(),
                end: b"c".to_vec(),
            }])
            .unwrap();

        store
            .compact_range("m", None, None, CompactOptions::default())
            .unwrap();

        assert_eq!(store.get("m", b"a").unwrap(), None);
        assert_eq!(store.get("m", b"b").unwrap(), None);
        assert_eq!(store.get("m", b"z").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn compact_on_empty_namespace_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let store = open(&tmp);
        store
            .compact_range("m", None, None, CompactOptions::default())
            .unwrap();
    }
}
