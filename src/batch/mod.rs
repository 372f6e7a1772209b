//! # Write Batches
//!
//! A batch is an atomic group of mutations, identified by a numeric id and
//! recorded against one or more key ranges. Mutations are buffered in
//! commit order until the batch ends; ending a non-empty batch lowers the
//! buffer into leaf-store operations and applies them in one atomic write.
//!
//! ## Lowering
//!
//! - `put` becomes a single-delete followed by a put, which lets
//!   log-structured leaf stores reclaim stacked overwrites early.
//! - `insert` (caller promises the key is absent) becomes a bare put.
//! - `clear_sub_range` with a missing endpoint resolves it at commit time
//!   by seeking to the first/last key within the range; when the slice is
//!   empty the operation dissolves into a no-op.
//!
//! ## Outcome contract
//!
//! On successful commit every touched range folds its delta into the
//! aggregates. On commit failure, and on abort, the deltas are dropped and
//! the aggregates stay untouched — an aborted batch contributes zero.


use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::trace;

use crate::engine::EngineError;
use crate::range::KeyRange;
use crate::store::{LeafStore, StoreError, WriteOp};

/// A buffered engine-level mutation.
enum BatchOp {
    Put {
        ns: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Insert {
        ns: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        ns: String,
        key: Vec<u8>,
    },
    ClearSubRange {
        range: Arc<KeyRange>,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    },
}

struct BatchState {
    ops: Vec<BatchOp>,
    ranges: HashMap<u64, Arc<KeyRange>>,
}

/// Registry of open batches, keyed by batch id.
pub(crate) struct BatchRegistry {
    next_id: AtomicU64,
    batches: DashMap<u64, BatchState>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            batches: DashMap::new(),
        }
    }

    /// Opens a new batch and returns its id.
    pub fn start(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.batches.insert(
            id,
            BatchState {
                ops: Vec::new(),
                ranges: HashMap::new(),
            },
        );
        trace!(batch = id, "batch opened");
        id
    }

    pub fn record_put(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), EngineError> {
        self.record(batch_id, range, |ns| BatchOp::Put { ns, key, value })?;
        range.record_put(batch_id);
        Ok(())
    }

    pub fn record_insert(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), EngineError> {
        self.record(batch_id, range, |ns| BatchOp::Insert { ns, key, value })?;
        range.record_insert(batch_id);
        Ok(())
    }

    pub fn record_delete(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        key: Vec<u8>,
    ) -> Result<(), EngineError> {
        self.record(batch_id, range, |ns| BatchOp::Delete { ns, key })?;
        range.record_delete(batch_id);
        Ok(())
    }

    pub fn record_clear_sub_range(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
    ) -> Result<(), EngineError> {
        let clear_range = Arc::clone(range);
        self.record(batch_id, range, |_| BatchOp::ClearSubRange {
            range: clear_range,
            start,
            end,
        })?;
        range.record_delete_range(batch_id);
        Ok(())
    }

    fn record(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        make: impl FnOnce(String) -> BatchOp,
    ) -> Result<(), EngineError> {
        let mut state = self
            .batches
            .get_mut(&batch_id)
            .ok_or(EngineError::UnknownBatch(batch_id))?;
        state.ops.push(make(range.namespace().to_string()));
        state
            .ranges
            .entry(range.id())
            .or_insert_with(|| Arc::clone(range));
        Ok(())
    }

    /// Commits the batch: lowers its buffer, applies it atomically, and on
    /// success folds every touched range's delta. An empty batch simply
    /// closes with an abort on each touched range.
    pub fn end(&self, batch_id: u64, store: &dyn LeafStore) -> Result<(), EngineError> {
        let (_, state) = self
            .batches
            .remove(&batch_id)
            .ok_or(EngineError::UnknownBatch(batch_id))?;

        if state.ops.is_empty() {
            for range in state.ranges.values() {
                range.abort_batch(batch_id);
            }
            trace!(batch = batch_id, "empty batch closed");
            return Ok(());
        }

        let lowered = match lower_ops(state.ops, store) {
            Ok(ops) => ops,
            Err(e) => {
                for range in state.ranges.values() {
                    range.abort_batch(batch_id);
                }
                return Err(e.into());
            }
        };

        match store.write_batch(lowered) {
            Ok(()) => {
                for range in state.ranges.values() {
                    range.end_batch(batch_id);
                }
                trace!(batch = batch_id, "batch committed");
                Ok(())
            }
            Err(e) => {
                // The batch is closed, but the aggregates must not move.
                for range in state.ranges.values() {
                    range.abort_batch(batch_id);
                }
                Err(e.into())
            }
        }
    }

    /// Drops the batch and every touched range's delta.
    pub fn abort(&self, batch_id: u64) -> Result<(), EngineError> {
        let (_, state) = self
            .batches
            .remove(&batch_id)
            .ok_or(EngineError::UnknownBatch(batch_id))?;
        for range in state.ranges.values() {
            range.abort_batch(batch_id);
        }
        trace!(batch = batch_id, "batch aborted");
        Ok(())
    }

    /// Number of currently open batches.
    pub fn open_count(&self) -> usize {
        self.batches.len()
    }
}

// ------------------------------------------------------------------------------------------------
// Lowering
// ------------------------------------------------------------------------------------------------

fn lower_ops(ops: Vec<BatchOp>, store: &dyn LeafStore) -> Result<Vec<WriteOp>, StoreError> {
    let mut lowered = Vec::with_capacity(ops.len());
    for op in ops {
        match op {
            BatchOp::Put { ns, key, value } => {
                lowered.push(WriteOp::SingleDelete {
                    ns: ns.clone(),
                    key: key.clone(),
                });
                lowered.push(WriteOp::Put { ns, key, value });
            }
            BatchOp::Insert { ns, key, value } => {
                lowered.push(WriteOp::Put { ns, key, value });
            }
            BatchOp::Delete { ns, key } => {
                lowered.push(WriteOp::Delete { ns, key });
            }
            BatchOp::ClearSubRange { range, start, end } => {
                if let Some(op) = resolve_clear(store, &range, start, end)? {
                    lowered.push(op);
                }
            }
        }
    }
    Ok(lowered)
}

/// Resolves a sub-range clear into a concrete delete-range, seeking the
/// first/last key within the range for missing endpoints. Returns `None`
/// when the slice holds no keys.
fn resolve_clear(
    store: &dyn LeafStore,
    range: &KeyRange,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
) -> Result<Option<WriteOp>, StoreError> {
    let lower = clamp_lower(start.as_deref(), range.start()).map(<[u8]>::to_vec);
    let upper = clamp_upper(end.as_deref(), range.end()).map(<[u8]>::to_vec);

    let resolved_start = match start {
        Some(start) => start,
        None => {
            let mut iter = store.iterator(range.namespace(), lower.as_deref(), upper.as_deref())?;
            if !iter.seek_first()? {
                return Ok(None);
            }
            iter.key().to_vec()
        }
    };

    let resolved_end = match end {
        Some(end) => end,
        None => {
            let mut iter = store.iterator(range.namespace(), lower.as_deref(), upper.as_deref())?;
            if !iter.seek_last()? {
                return Ok(None);
            }
            // Successor of the last key: the smallest key strictly greater.
            let mut key = iter.key().to_vec();
            key.push(0x00);
            key
        }
    };

    if resolved_start >= resolved_end {
        return Ok(None);
    }
    Ok(Some(WriteOp::DeleteRange {
        ns: range.namespace().to_string(),
        start: resolved_start,
        end: resolved_end,
    }))
}

fn clamp_lower<'a>(explicit: Option<&'a [u8]>, bound: Option<&'a [u8]>) -> Option<&'a [u8]> {
    match (explicit, bound) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn clamp_upper<'a>(explicit: Option<&'a [u8]>, bound: Option<&'a [u8]>) -> Option<&'a [u8]> {
    match (explicit, bound) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}
