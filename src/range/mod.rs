//! # Key Range
//!
//! A logical half-open cursor `[start, end)` within one namespace. Many
//! overlapping ranges may address the same namespace — they partition
//! *statistics*, not storage. Every range tracks how much live data,
//! tombstone load, and range-delete activity its committed batches
//! produced, and nominates its own slice for background compaction when
//! the tombstone load crosses the configured trigger.
//!
//! ## Accounting
//!
//! Mutations recorded against an open batch accumulate in a per-batch
//! delta triple. Ending the batch folds the triple into the aggregate
//! counters and evaluates the trigger; aborting drops the triple so an
//! aborted batch contributes nothing. The aggregates therefore always
//! equal the sum of committed deltas — modulo the reset that fires when a
//! hint is submitted.
//!
//! A `put` counts into both the key column and the tombstone column: the
//! engine lowers it to a single-delete followed by a put, so every
//! overwrite leaves a mark that compaction can reclaim.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::debug;

use crate::compact::CompactionScheduler;

/// Default lower bound on tombstone count before the ratio trigger fires.
pub const DEFAULT_MIN_TOMBSTONE_KEYS: u64 = 200_000;

/// Default tombstone-to-total ratio that arms the trigger.
pub const DEFAULT_TOMBSTONE_PERCENT: f64 = 0.3;

/// Mutation counts accumulated by one in-flight batch.
#[derive(Debug, Default, Clone, Copy)]
struct BatchDelta {
    keys: u64,
    tombstones: u64,
    delete_ranges: u64,
}

/// A statistics-bearing cursor over `[start, end)` in one namespace.
///
/// `None` bounds are open. Thread-safe: counters are atomic, per-batch
/// deltas live in a concurrent map keyed by batch id, and trigger
/// evaluation is serialized so a reset cannot race a concurrent fold.
pub struct KeyRange {
    id: u64,
    ns: String,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,

    key_count: AtomicU64,
    tombstone_count: AtomicU64,
    delete_range_count: AtomicU64,
    deltas: DashMap<u64, BatchDelta>,
    trigger: Mutex<()>,

    scheduler: Arc<CompactionScheduler>,
    min_tombstone_keys: u64,
    tombstone_percent: f64,
}

impl KeyRange {
    pub(crate) fn new(
        id: u64,
        ns: String,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        scheduler: Arc<CompactionScheduler>,
        min_tombstone_keys: u64,
        tombstone_percent: f64,
    ) -> Self {
        Self {
            id,
            ns,
            start,
            end,
            key_count: AtomicU64::new(0),
            tombstone_count: AtomicU64::new(0),
            delete_range_count: AtomicU64::new(0),
            deltas: DashMap::new(),
            trigger: Mutex::new(()),
            scheduler,
            min_tombstone_keys,
            tombstone_percent,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn namespace(&self) -> &str {
        &self.ns
    }

    /// Inclusive lower bound; `None` is unbounded below.
    pub fn start(&self) -> Option<&[u8]> {
        self.start.as_deref()
    }

    /// Exclusive upper bound; `None` is unbounded above.
    pub fn end(&self) -> Option<&[u8]> {
        self.end.as_deref()
    }

    /// Whether `key` falls within `[start, end)`.
    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match &self.start {
            Some(start) => key >= start.as_slice(),
            None => true,
        };
        let below = match &self.end {
            Some(end) => key < end.as_slice(),
            None => true,
        };
        above && below
    }

    // --------------------------------------------------------------------------------------------
    // Per-batch recording
    // --------------------------------------------------------------------------------------------

    pub(crate) fn record_put(&self, batch_id: u64) {
        let mut delta = self.deltas.entry(batch_id).or_default();
        delta.keys += 1;
        delta.tombstones += 1;
    }

    pub(crate) fn record_insert(&self, batch_id: u64) {
        self.deltas.entry(batch_id).or_default().keys += 1;
    }

    pub(crate) fn record_delete(&self, batch_id: u64) {
        self.deltas.entry(batch_id).or_default().tombstones += 1;
    }

    pub(crate) fn record_delete_range(&self, batch_id: u64) {
        self.deltas.entry(batch_id).or_default().delete_ranges += 1;
    }

    /// Folds the batch's delta into the aggregates and evaluates the
    /// compaction trigger. Called only after the batch committed.
    pub(crate) fn end_batch(&self, batch_id: u64) {
        let Some((_, delta)) = self.deltas.remove(&batch_id) else {
            return;
        };
        self.key_count.fetch_add(delta.keys, Ordering::SeqCst);
        self.tombstone_count
            .fetch_add(delta.tombstones, Ordering::SeqCst);
        self.delete_range_count
            .fetch_add(delta.delete_ranges, Ordering::SeqCst);
        self.evaluate_trigger();
    }

    /// Drops the batch's delta; aggregates stay untouched.
    pub(crate) fn abort_batch(&self, batch_id: u64) {
        self.deltas.remove(&batch_id);
    }

    /// Current aggregates: `(keys, tombstones, delete_ranges)`.
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.key_count.load(Ordering::SeqCst),
            self.tombstone_count.load(Ordering::SeqCst),
            self.delete_range_count.load(Ordering::SeqCst),
        )
    }

    // --------------------------------------------------------------------------------------------
    // Trigger
    // --------------------------------------------------------------------------------------------

    /// Submits a hint for this range's slice when a range delete landed,
    /// or when the tombstone load is both large and dominant. Firing
    /// resets the aggregates so the trigger re-arms only after new
    /// batches accrue.
    fn evaluate_trigger(&self) {
        let Ok(_serialized) = self.trigger.lock() else {
            return;
        };

        let t = self.tombstone_count.load(Ordering::SeqCst);
        let k = self.key_count.load(Ordering::SeqCst);
        let r = self.delete_range_count.load(Ordering::SeqCst);

        let ratio_fired =
            t > self.min_tombstone_keys && t as f64 / (t + k) as f64 >= self.tombstone_percent;
        if r == 0 && !ratio_fired {
            return;
        }

        self.key_count.store(0, Ordering::SeqCst);
        self.tombstone_count.store(0, Ordering::SeqCst);
        self.delete_range_count.store(0, Ordering::SeqCst);

        debug!(
            range = self.id,
            ns = %self.ns,
            tombstones = t,
            keys = k,
            range_deletes = r,
            "tombstone trigger fired"
        );
        self.scheduler
            .submit(&self.ns, self.start.as_deref(), self.end.as_deref());
    }
}
