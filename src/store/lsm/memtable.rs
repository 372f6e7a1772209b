//! Per-namespace in-memory write buffer.
//!
//! ## Design Invariants
//!
//! - Every mutation carries a store-wide sequence number; within one
//!   memtable a key holds only its latest version (lower-sequence versions
//!   are overwritten in place).
//! - Deletes are tombstones (`value = None`), not physical removal — they
//!   must survive the flush so they can shadow older runs.
//! - Range tombstones logically delete all keys in `[start, end)` with
//!   lower sequences; resolution happens at read time.
//! - Durability is the store-wide log's concern; the memtable itself is
//!   purely in-memory and is rebuilt by replay on open.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::{PointRecord, RangeTombstone};

/// One buffered point entry: the latest version of a key.
#[derive(Debug, Clone)]
struct MemEntry {
    seq: u64,
    /// `None` is a point tombstone.
    value: Option<Vec<u8>>,
}

/// The mutable, in-memory write buffer of one namespace.
///
/// Callers synchronize externally (the owning store holds each namespace
/// behind an `RwLock`).
#[derive(Debug, Default)]
pub(crate) struct Memtable {
    tree: BTreeMap<Vec<u8>, MemEntry>,
    tombstones: Vec<RangeTombstone>,
    bytes: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, seq: u64, key: Vec<u8>, value: Vec<u8>) {
        self.bytes += key.len() + value.len();
        if let Some(old) = self.tree.insert(
            key,
            MemEntry {
                seq,
                value: Some(value),
            },
        ) {
            self.bytes -= old.value.map(|v| v.len()).unwrap_or(0);
        }
    }

    pub fn delete(&mut self, seq: u64, key: Vec<u8>) {
        self.bytes += key.len();
        if let Some(old) = self.tree.insert(key, MemEntry { seq, value: None }) {
            self.bytes -= old.value.map(|v| v.len()).unwrap_or(0);
        }
    }

    pub fn delete_range(&mut self, seq: u64, start: Vec<u8>, end: Vec<u8>) {
        self.bytes += start.len() + end.len();
        self.tombstones.push(RangeTombstone { start, end, seq });
    }

    /// The raw point entry for `key`, if buffered: `(seq, value)` where a
    /// `None` value is a tombstone. Range tombstones are not applied here;
    /// they shadow across layers and are resolved by the caller.
    pub fn entry(&self, key: &[u8]) -> Option<(u64, Option<&[u8]>)> {
        self.tree
            .get(key)
            .map(|entry| (entry.seq, entry.value.as_deref()))
    }

    /// Highest sequence among range tombstones covering `key`, if any.
    pub fn max_covering_tombstone(&self, key: &[u8]) -> Option<u64> {
        self.tombstones
            .iter()
            .filter(|tomb| tomb.start.as_slice() <= key && key < tomb.end.as_slice())
            .map(|tomb| tomb.seq)
            .max()
    }

    /// Buffered point entries with keys in `[lower, upper)`, ascending.
    pub fn slice<'a>(
        &'a self,
        lower: Option<&'a [u8]>,
        upper: Option<&'a [u8]>,
    ) -> impl Iterator<Item = (&'a [u8], u64, Option<&'a [u8]>)> + 'a {
        let lo = match lower {
            Some(lo) => Bound::Included(lo),
            None => Bound::Unbounded,
        };
        let hi = match upper {
            Some(up) => Bound::Excluded(up),
            None => Bound::Unbounded,
        };
        self.tree
            .range::<[u8], _>((lo, hi))
            .map(|(key, entry)| (key.as_slice(), entry.seq, entry.value.as_deref()))
    }

    /// Range tombstones overlapping `[lower, upper)`.
    pub fn tombstones_overlapping<'a>(
        &'a self,
        lower: Option<&'a [u8]>,
        upper: Option<&'a [u8]>,
    ) -> impl Iterator<Item = &'a RangeTombstone> + 'a {
        self.tombstones.iter().filter(move |tomb| {
            let above_lower = match lower {
                Some(lo) => tomb.end.as_slice() > lo,
                None => true,
            };
            let below_upper = match upper {
                Some(up) => tomb.start.as_slice() < up,
                None => true,
            };
            above_lower && below_upper
        })
    }

    /// Estimated buffered bytes for keys in `[lower, upper)`.
    pub fn approximate_bytes(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> u64 {
        self.slice(lower, upper)
            .map(|(key, _, value)| key.len() as u64 + value.map(|v| v.len() as u64).unwrap_or(0))
            .sum()
    }

    /// Total buffered bytes (keys, values, and tombstone bounds).
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty() && self.tombstones.is_empty()
    }

    /// Drains the memtable into flushable records: point records sorted by
    /// key (tombstones included) plus the range tombstones. The memtable
    /// is empty afterwards.
    pub fn drain_for_flush(&mut self) -> (Vec<PointRecord>, Vec<RangeTombstone>) {
        let tree = std::mem::take(&mut self.tree);
        let tombstones = std::mem::take(&mut self.tombstones);
        self.bytes = 0;

        let points = tree
            .into_iter()
            .map(|(key, entry)| PointRecord {
                key,
                seq: entry.seq,
                value: entry.value,
            })
            .collect();
        (points, tombstones)
    }
}
