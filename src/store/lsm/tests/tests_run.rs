//! Run file round trips, lookup, slicing, and corruption detection.

#[cfg(test)]
mod tests {
    use crate::store::lsm::run::{Run, RunWriter};
    use crate::store::lsm::{PointRecord, RangeTombstone};
    use tempfile::TempDir;

    fn record(key: &[u8], seq: u64, value: Option<&[u8]>) -> PointRecord {
        PointRecord {
            key: key.to_vec(),
            seq,
            value: value.map(<[u8]>::to_vec),
        }
    }

    fn build_run(dir: &TempDir, points: &[PointRecord], ranges: &[RangeTombstone]) -> Run {
        let path = dir.path().join("run-000001.run");
        RunWriter::new(&path).build(points, ranges).unwrap();
        Run::open(1, &path).unwrap()
    }

    #[test]
    fn round_trip_points_and_tombstones() {
        let tmp = TempDir::new().unwrap();
        let points = vec![
            record(b"alpha", 1, Some(b"1")),
            record(b"beta", 2, None),
            record(b"gamma", 3, Some(b"3")),
        ];
        let ranges = vec![RangeTombstone {
            start: b"m".to_vec(),
            end: b"q".to_vec(),
            seq: 4,
        }];
        let run = build_run(&tmp, &points, &ranges);

        assert_eq!(run.point_count(), 3);
        assert_eq!(run.tombstones().len(), 1);
        assert_eq!(run.min_seq, 1);
        assert_eq!(run.max_seq, 4);

        let hit = run.get(b"alpha").unwrap();
        assert_eq!(hit.seq, 1);
        assert_eq!(hit.value, Some(b"1".as_slice()));

        // Point tombstones come back with no value.
        let hit = run.get(b"beta").unwrap();
        assert_eq!(hit.seq, 2);
        assert_eq!(hit.value, None);

        assert!(run.get(b"delta").is_none());
    }

    #[test]
    fn bloom_accepts_present_keys() {
        let tmp = TempDir::new().unwrap();
        let points: Vec<_> = (0..100u32)
            .map(|i| record(format!("key_{i:04}").as_bytes(), i as u64 + 1, Some(b"v")))
            .collect();
        let run = build_run(&tmp, &points, &[]);

        for point in &points {
            assert!(run.may_contain(&point.key));
        }
    }

    #[test]
    fn slice_respects_bounds() {
        let tmp = TempDir::new().unwrap();
        let points = vec![
            record(b"a", 1, Some(b"1")),
            record(b"b", 2, Some(b"2")),
            record(b"c", 3, Some(b"3")),
            record(b"d", 4, Some(b"4")),
        ];
        let run = build_run(&tmp, &points, &[]);

        let keys: Vec<_> = run
            .slice(Some(b"b"), Some(b"d"))
            .map(|(key, _, _)| key.to_vec())
            .collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);

        let all: Vec<_> = run.slice(None, None).map(|(key, _, _)| key).collect();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn tombstones_overlapping_filters() {
        let tmp = TempDir::new().unwrap();
        let ranges = vec![
            RangeTombstone {
                start: b"a".to_vec(),
                end: b"c".to_vec(),
                seq: 1,
            },
            RangeTombstone {
                start: b"x".to_vec(),
                end: b"z".to_vec(),
                seq: 2,
            },
        ];
        let run = build_run(&tmp, &[record(b"a", 3, Some(b"v"))], &ranges);

        let hits: Vec<_> = run.tombstones_overlapping(Some(b"b"), Some(b"d")).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].start, b"a".to_vec());

        let hits: Vec<_> = run.tombstones_overlapping(Some(b"c"), Some(b"w")).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn approximate_bytes_counts_slice_only() {
        let tmp = TempDir::new().unwrap();
        let points = vec![
            record(b"a", 1, Some(&[0u8; 100])),
            record(b"b", 2, Some(&[0u8; 100])),
        ];
        let run = build_run(&tmp, &points, &[]);

        let whole = run.approximate_bytes(None, None);
        let half = run.approximate_bytes(Some(b"b"), None);
        assert!(whole > half);
        assert!(half > 100);
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("run-000001.run");
        RunWriter::new(&path)
            .build(&[record(b"key", 1, Some(b"value"))], &[])
            .unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(Run::open(1, &path).is_err());
    }

    #[test]
    fn empty_run_is_valid() {
        let tmp = TempDir::new().unwrap();
        let run = build_run(&tmp, &[], &[]);
        assert_eq!(run.point_count(), 0);
        assert!(!run.may_contain(b"anything"));
        assert!(run.get(b"anything").is_none());
    }
}
