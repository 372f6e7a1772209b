//! # Leaf Store Capability Surface
//!
//! The engine does not talk to disk directly — it talks to a **leaf store**,
//! a narrow, pluggable surface over an LSM-style key/value library. This
//! module defines that surface:
//!
//! - [`LeafStore`] — namespaced point reads, range iterators, atomic batch
//!   writes, approximate sizes, manual range compaction, flush, checkpoint
//!   creation, and read-only opening of a checkpoint directory.
//! - [`LeafIter`] — a bidirectional, seekable cursor over one namespace.
//! - [`WriteOp`] — the mutation vocabulary of an atomic batch.
//!
//! The default implementation lives in [`lsm`]. Alternative backends only
//! need to satisfy these traits; the engine layers (ranges, batches,
//! checkpoints, the compaction scheduler) are backend-agnostic.
//!
//! ## Semantics required of an implementation
//!
//! - Keys order by **unsigned lexicographic** byte comparison.
//! - `write_batch` is atomic (all-or-nothing) but provides no isolation
//!   against concurrent writers beyond last-writer-wins per key.
//! - `may_exist` has bloom-filter semantics: `true` may be returned for an
//!   absent key, `false` is authoritative.
//! - `approximate_size` accounts for both in-memory and on-disk data.
//! - `compact_range` is synchronous and may compact a **superset** of the
//!   requested slice.
//! - `checkpoint` must be preceded by a flush so the on-disk copy is
//!   self-contained; `open_read_only` must preserve the namespace order it
//!   is given (the `default` namespace comes first).

pub mod lsm;

use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

/// Name of the namespace every store carries; always first in any ordered
/// enumeration of namespaces.
pub const DEFAULT_NAMESPACE: &str = "default";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by leaf store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk data failed checksum or structural validation.
    #[error("Corrupted store file: {0}")]
    Corruption(String),

    /// The namespace is not part of this store.
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    /// Mutation attempted against a read-only (checkpoint) view.
    #[error("Store is read-only")]
    ReadOnly,

    /// Internal invariant violation (poisoned lock, unexpected state, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Mutation vocabulary
// ------------------------------------------------------------------------------------------------

/// A single mutation inside an atomic [`LeafStore::write_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set `key` to `value`.
    Put {
        ns: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },

    /// Remove `key`, promising the caller wrote it at most once since the
    /// last delete. Stores without a dedicated single-delete path treat
    /// this as [`WriteOp::Delete`].
    SingleDelete { ns: String, key: Vec<u8> },

    /// Remove `key` (point tombstone).
    Delete { ns: String, key: Vec<u8> },

    /// Remove every key in `[start, end)` (range tombstone).
    DeleteRange {
        ns: String,
        start: Vec<u8>,
        end: Vec<u8>,
    },
}

impl WriteOp {
    /// The namespace this mutation addresses.
    pub fn namespace(&self) -> &str {
        match self {
            WriteOp::Put { ns, .. }
            | WriteOp::SingleDelete { ns, .. }
            | WriteOp::Delete { ns, .. }
            | WriteOp::DeleteRange { ns, .. } => ns,
        }
    }
}

/// Options for a manual range compaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactOptions {
    /// When true, tombstones are retained in the rewritten output instead
    /// of being dropped. Used when the compacted slice may still shadow
    /// data the store cannot see.
    pub skip_bottommost: bool,
}

/// Memory gauges reported by a leaf store.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreMemoryUsage {
    /// Bytes buffered in memtables across all namespaces.
    pub memtable_bytes: u64,
    /// Bytes of resident run indices (keys + offsets).
    pub index_bytes: u64,
    /// Bytes of run files currently memory-mapped.
    pub mapped_bytes: u64,
}

// ------------------------------------------------------------------------------------------------
// Capability traits
// ------------------------------------------------------------------------------------------------

/// A bidirectional, seekable cursor over one namespace of a leaf store.
///
/// All seek operations return whether the cursor landed on an entry.
/// `key`/`value` must only be called while [`LeafIter::is_valid`] is true.
/// Resources are released on drop.
pub trait LeafIter: Send {
    /// Position on the first entry within the iterator's bounds.
    fn seek_first(&mut self) -> Result<bool, StoreError>;

    /// Position on the last entry within the iterator's bounds.
    fn seek_last(&mut self) -> Result<bool, StoreError>;

    /// Position on the first entry with key `>= target`.
    fn seek(&mut self, target: &[u8]) -> Result<bool, StoreError>;

    /// Position on the last entry with key `<= target`.
    fn seek_for_prev(&mut self, target: &[u8]) -> Result<bool, StoreError>;

    /// Advance to the next entry.
    fn next(&mut self) -> Result<bool, StoreError>;

    /// Step back to the previous entry.
    fn prev(&mut self) -> Result<bool, StoreError>;

    /// Whether the cursor is positioned on an entry.
    fn is_valid(&self) -> bool;

    /// Key at the current position.
    fn key(&self) -> &[u8];

    /// Value at the current position.
    fn value(&self) -> &[u8];

    /// Re-read the underlying store so the cursor observes writes committed
    /// after its creation. The position is reset; callers must seek again.
    fn refresh(&mut self) -> Result<(), StoreError>;
}

/// Capability surface over an LSM-like store.
///
/// Object-safe so the engine can hold live stores and read-only checkpoint
/// views behind the same handle type.
pub trait LeafStore: Send + Sync {
    /// Namespaces of this store, `default` first, in open order.
    fn namespaces(&self) -> &[String];

    /// Point lookup.
    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Fast existence probe; may return `true` for absent keys.
    fn may_exist(&self, ns: &str, key: &[u8]) -> Result<bool, StoreError>;

    /// Open a cursor over `[lower, upper)`; `None` bounds are open.
    fn iterator(
        &self,
        ns: &str,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<Box<dyn LeafIter>, StoreError>;

    /// Apply all mutations atomically.
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Estimated bytes held for `[lower, upper)` in `ns`, counting both
    /// memtable and on-disk contributions.
    fn approximate_size(
        &self,
        ns: &str,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<u64, StoreError>;

    /// Synchronously compact the given slice of `ns`. Blocks until the
    /// rewrite completes.
    fn compact_range(
        &self,
        ns: &str,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        opts: CompactOptions,
    ) -> Result<(), StoreError>;

    /// Persist all buffered writes to runs. When `wait` is false an
    /// implementation may return after scheduling the work.
    fn flush(&self, wait: bool) -> Result<(), StoreError>;

    /// Sync the write-ahead log to disk without flushing memtables.
    fn flush_wal(&self, sync: bool) -> Result<(), StoreError>;

    /// Create a consistent on-disk copy of the store at `path`, readable
    /// later via [`LeafStore::open_read_only`].
    fn checkpoint(&self, path: &Path) -> Result<(), StoreError>;

    /// Open a checkpoint directory as a read-only store with the given
    /// namespace order.
    fn open_read_only(
        &self,
        path: &Path,
        namespaces: &[String],
    ) -> Result<Arc<dyn LeafStore>, StoreError>;

    /// Current memory gauges.
    fn memory_usage(&self) -> StoreMemoryUsage;

    /// Release file handles and flush pending state. Idempotent.
    fn close(&self) -> Result<(), StoreError>;
}
