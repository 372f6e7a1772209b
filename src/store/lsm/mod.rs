//! Default leaf store — a compact log-structured implementation.
//!
//! ## Design Overview
//!
//! Data for each namespace lives in two layers, queried newest-first:
//!
//! 1. **Memtable** — an in-memory sorted map of the latest version per key,
//!    plus buffered range tombstones.
//! 2. **Runs** — immutable, sorted, checksummed on-disk files produced by
//!    flushes and compactions, ordered by maximum sequence number.
//!
//! A single store-wide write-ahead log records every committed batch as one
//! frame, making batches atomic across namespaces. A store-wide sequence
//! counter orders mutations; read resolution compares sequences between
//! point records and range tombstones, so the layers can be merged without
//! coordination.
//!
//! ## Concurrency Model
//!
//! Each namespace is guarded by its own `RwLock`. Writers lock the touched
//! namespaces in store order; full flushes and checkpoints lock all of them,
//! which also makes log truncation safe (no writer can append while every
//! namespace is held). Reads take a single read lock.
//!
//! ## Guarantees
//!
//! - **Durability:** committed batches are fsynced to the log before being
//!   acknowledged (unless the log is disabled).
//! - **Crash recovery:** on open, runs are loaded and the log tail is
//!   replayed into the memtables.
//! - **Checkpoint consistency:** a checkpoint is taken with every namespace
//!   locked, after a full flush, so the copied runs are self-contained.

mod codec;
mod memtable;
mod run;
mod wal;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    CompactOptions, DEFAULT_NAMESPACE, LeafIter, LeafStore, StoreError, StoreMemoryUsage, WriteOp,
};
use memtable::Memtable;
use run::{Run, RunWriter};
use wal::{Wal, WalOp};

/// Filename of the store-native identity line, written once at creation.
pub const IDENTITY_FILE: &str = "IDENTITY";

const WAL_FILE: &str = "wal.log";
const RUN_SUFFIX: &str = ".run";

// ------------------------------------------------------------------------------------------------
// Shared record types
// ------------------------------------------------------------------------------------------------

/// A sequence-stamped point record; `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PointRecord {
    pub key: Vec<u8>,
    pub seq: u64,
    pub value: Option<Vec<u8>>,
}

/// A range tombstone deleting `[start, end)` at `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RangeTombstone {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
    pub seq: u64,
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Per-namespace option overrides.
#[derive(Debug, Clone, Default)]
pub struct NamespaceOptions {
    /// Memtable size (bytes) that triggers an automatic flush of this
    /// namespace. Falls back to [`StoreOptions::write_buffer_size`].
    pub write_buffer_size: Option<usize>,
}

/// Configuration for an [`LsmStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Default memtable size (bytes) before a namespace is flushed.
    pub write_buffer_size: usize,

    /// When true no write-ahead log is kept; commits are only as durable
    /// as the last flush.
    pub disable_wal: bool,

    /// Per-namespace overrides, keyed by namespace name.
    pub namespace_options: HashMap<String, NamespaceOptions>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            write_buffer_size: 4 * 1024 * 1024,
            disable_wal: false,
            namespace_options: HashMap::new(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Store
// ------------------------------------------------------------------------------------------------

/// One namespace: its directory and guarded state.
struct Space {
    name: String,
    dir: PathBuf,
    write_buffer_size: usize,
    inner: RwLock<SpaceInner>,
}

struct SpaceInner {
    mem: Memtable,
    /// Ordered by `max_seq` descending (newest first).
    runs: Vec<Run>,
    next_run_id: u64,
}

/// The default leaf store.
pub struct LsmStore {
    root: PathBuf,
    namespaces: Vec<String>,
    index: HashMap<String, usize>,
    spaces: Vec<Arc<Space>>,
    wal: Option<Wal>,
    seq: AtomicU64,
    read_only: bool,
    closed: AtomicBool,
}

impl LsmStore {
    /// Opens (or creates) a store rooted at `root` with a fixed namespace
    /// set. `default` must be first in `namespaces`. On an existing
    /// directory, runs are loaded and the log is replayed.
    pub fn open(
        root: impl AsRef<Path>,
        namespaces: &[String],
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        Self::validate_namespaces(namespaces)?;
        fs::create_dir_all(&root)?;

        let identity_path = root.join(IDENTITY_FILE);
        if !identity_path.exists() {
            fs::write(&identity_path, format!("{}\n", Uuid::new_v4()))?;
        }

        let mut spaces = Vec::with_capacity(namespaces.len());
        let mut index = HashMap::new();
        let mut max_seq = 0u64;

        for (i, name) in namespaces.iter().enumerate() {
            let dir = root.join(name);
            fs::create_dir_all(&dir)?;
            let (runs, next_run_id, space_max_seq) = Self::load_runs(&dir)?;
            max_seq = max_seq.max(space_max_seq);

            let write_buffer_size = options
                .namespace_options
                .get(name)
                .and_then(|o| o.write_buffer_size)
                .unwrap_or(options.write_buffer_size);

            index.insert(name.clone(), i);
            spaces.push(Arc::new(Space {
                name: name.clone(),
                dir,
                write_buffer_size,
                inner: RwLock::new(SpaceInner {
                    mem: Memtable::new(),
                    runs,
                    next_run_id,
                }),
            }));
        }

        let wal = if options.disable_wal {
            None
        } else {
            let (wal, batches) = Wal::open(root.join(WAL_FILE))?;
            for batch in batches {
                for WalOp { seq, op } in batch {
                    max_seq = max_seq.max(seq);
                    let Some(&i) = index.get(op.namespace()) else {
                        warn!(ns = op.namespace(), "replayed op for unknown namespace");
                        continue;
                    };
                    let mut inner = write_guard(&spaces[i])?;
                    apply_op(&mut inner.mem, seq, op);
                }
            }
            Some(wal)
        };

        info!(
            root = %root.display(),
            namespaces = namespaces.len(),
            last_seq = max_seq,
            "store opened"
        );

        Ok(Self {
            root,
            namespaces: namespaces.to_vec(),
            index,
            spaces,
            wal,
            seq: AtomicU64::new(max_seq),
            read_only: false,
            closed: AtomicBool::new(false),
        })
    }

    fn validate_namespaces(namespaces: &[String]) -> Result<(), StoreError> {
        if namespaces.first().map(String::as_str) != Some(DEFAULT_NAMESPACE) {
            return Err(StoreError::Internal(format!(
                "namespace order must begin with `{DEFAULT_NAMESPACE}`"
            )));
        }
        for name in namespaces {
            if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
                return Err(StoreError::Internal(format!(
                    "namespace name is not path-safe: {name:?}"
                )));
            }
        }
        Ok(())
    }

    /// Scans a namespace directory for run files. Returns the runs
    /// (newest first), the next free run id, and the highest sequence seen.
    fn load_runs(dir: &Path) -> Result<(Vec<Run>, u64, u64), StoreError> {
        let mut runs = Vec::new();
        let mut next_run_id = 1u64;
        let mut max_seq = 0u64;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(id) = name
                .strip_prefix("run-")
                .and_then(|s| s.strip_suffix(RUN_SUFFIX))
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            let run = Run::open(id, &path)?;
            next_run_id = next_run_id.max(id + 1);
            max_seq = max_seq.max(run.max_seq);
            runs.push(run);
        }

        runs.sort_by(|a, b| b.max_seq.cmp(&a.max_seq));
        Ok((runs, next_run_id, max_seq))
    }

    fn space(&self, ns: &str) -> Result<&Arc<Space>, StoreError> {
        let &i = self
            .index
            .get(ns)
            .ok_or_else(|| StoreError::UnknownNamespace(ns.to_string()))?;
        Ok(&self.spaces[i])
    }

    /// Write-locks every namespace in store order. Holding all guards
    /// excludes every writer, which is what makes log truncation and
    /// checkpoint copies safe.
    fn lock_all(&self) -> Result<Vec<RwLockWriteGuard<'_, SpaceInner>>, StoreError> {
        let mut guards = Vec::with_capacity(self.spaces.len());
        for space in &self.spaces {
            guards.push(write_guard(space)?);
        }
        Ok(guards)
    }

    /// Writes the memtable out as a new run. The log is *not* truncated
    /// here; replaying the covered frames after a crash merely recreates
    /// records the run already holds, and sequence comparison deduplicates
    /// them.
    fn flush_space(space: &Space, inner: &mut SpaceInner) -> Result<(), StoreError> {
        if inner.mem.is_empty() {
            return Ok(());
        }
        let (points, tombstones) = inner.mem.drain_for_flush();
        let id = inner.next_run_id;
        inner.next_run_id += 1;

        let path = space.dir.join(format!("run-{id:06}{RUN_SUFFIX}"));
        RunWriter::new(&path).build(&points, &tombstones)?;
        let run = Run::open(id, &path)?;

        debug!(ns = %space.name, run = id, points = points.len(), "memtable flushed");
        inner.runs.push(run);
        inner.runs.sort_by(|a, b| b.max_seq.cmp(&a.max_seq));
        Ok(())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }
}

fn write_guard<'a>(space: &'a Space) -> Result<RwLockWriteGuard<'a, SpaceInner>, StoreError> {
    space
        .inner
        .write()
        .map_err(|_| StoreError::Internal("namespace lock poisoned".into()))
}

fn read_guard<'a>(
    space: &'a Space,
) -> Result<std::sync::RwLockReadGuard<'a, SpaceInner>, StoreError> {
    space
        .inner
        .read()
        .map_err(|_| StoreError::Internal("namespace lock poisoned".into()))
}

fn apply_op(mem: &mut Memtable, seq: u64, op: WriteOp) {
    match op {
        WriteOp::Put { key, value, .. } => mem.put(seq, key, value),
        WriteOp::Delete { key, .. } | WriteOp::SingleDelete { key, .. } => mem.delete(seq, key),
        WriteOp::DeleteRange { start, end, .. } => mem.delete_range(seq, start, end),
    }
}

/// Resolves the visible `(key, value)` pairs of `[lower, upper)` across the
/// memtable and all runs: highest sequence per key wins, then point and
/// range tombstones suppress what they cover.
fn collect_visible(
    inner: &SpaceInner,
    lower: Option<&[u8]>,
    upper: Option<&[u8]>,
) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut acc: BTreeMap<&[u8], (u64, Option<&[u8]>)> = BTreeMap::new();
    let mut tombs: Vec<&RangeTombstone> = Vec::new();

    for (key, seq, value) in inner.mem.slice(lower, upper) {
        merge_entry(&mut acc, key, seq, value);
    }
    tombs.extend(inner.mem.tombstones_overlapping(lower, upper));

    for run in &inner.runs {
        for (key, seq, value) in run.slice(lower, upper) {
            merge_entry(&mut acc, key, seq, value);
        }
        tombs.extend(run.tombstones_overlapping(lower, upper));
    }

    acc.into_iter()
        .filter_map(|(key, (seq, value))| {
            let value = value?;
            let shadowed = tombs
                .iter()
                .any(|t| t.start.as_slice() <= key && key < t.end.as_slice() && t.seq > seq);
            if shadowed {
                None
            } else {
                Some((key.to_vec(), value.to_vec()))
            }
        })
        .collect()
}

fn merge_entry<'a>(
    acc: &mut BTreeMap<&'a [u8], (u64, Option<&'a [u8]>)>,
    key: &'a [u8],
    seq: u64,
    value: Option<&'a [u8]>,
) {
    match acc.entry(key) {
        std::collections::btree_map::Entry::Vacant(slot) => {
            slot.insert((seq, value));
        }
        std::collections::btree_map::Entry::Occupied(mut slot) => {
            if seq > slot.get().0 {
                slot.insert((seq, value));
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// LeafStore implementation
// ------------------------------------------------------------------------------------------------

impl LeafStore for LsmStore {
    fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let space = self.space(ns)?;
        let inner = read_guard(space)?;

        let mut best_seq = 0u64;
        let mut best_value: Option<Vec<u8>> = None;
        let mut tomb_seq = 0u64;

        if let Some((seq, value)) = inner.mem.entry(key) {
            best_seq = seq;
            best_value = value.map(<[u8]>::to_vec);
        }
        if let Some(seq) = inner.mem.max_covering_tombstone(key) {
            tomb_seq = seq;
        }

        // Runs are ordered by max_seq descending; once a run cannot beat
        // the winner so far, none of the remaining ones can either.
        for run in &inner.runs {
            if run.max_seq <= best_seq.max(tomb_seq) {
                break;
            }
            if let Some(hit) = run.get(key)
                && hit.seq > best_seq
            {
                best_seq = hit.seq;
                best_value = hit.value.map(<[u8]>::to_vec);
            }
            for tomb in run.tombstones() {
                if tomb.start.as_slice() <= key && key < tomb.end.as_slice() {
                    tomb_seq = tomb_seq.max(tomb.seq);
                }
            }
        }

        if tomb_seq > best_seq {
            return Ok(None);
        }
        Ok(best_value)
    }

    fn may_exist(&self, ns: &str, key: &[u8]) -> Result<bool, StoreError> {
        let space = self.space(ns)?;
        let inner = read_guard(space)?;
        if inner.mem.entry(key).is_some() {
            return Ok(true);
        }
        Ok(inner.runs.iter().any(|run| run.may_contain(key)))
    }

    fn iterator(
        &self,
        ns: &str,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<Box<dyn LeafIter>, StoreError> {
        let space = Arc::clone(self.space(ns)?);
        let inner = read_guard(&space)?;
        let entries = collect_visible(&inner, lower, upper);
        drop(inner);

        Ok(Box::new(LsmIter {
            space,
            lower: lower.map(<[u8]>::to_vec),
            upper: upper.map(<[u8]>::to_vec),
            entries,
            pos: None,
        }))
    }

    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.check_writable()?;
        if ops.is_empty() {
            return Ok(());
        }

        // Resolve and order the touched namespaces up front; locking in
        // store order keeps concurrent writers deadlock-free.
        let mut touched: Vec<usize> = Vec::new();
        for op in &ops {
            let &i = self
                .index
                .get(op.namespace())
                .ok_or_else(|| StoreError::UnknownNamespace(op.namespace().to_string()))?;
            if !touched.contains(&i) {
                touched.push(i);
            }
        }
        touched.sort_unstable();

        let base = self.seq.fetch_add(ops.len() as u64, Ordering::SeqCst) + 1;
        let wal_ops: Vec<WalOp> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| WalOp {
                seq: base + i as u64,
                op: op.clone(),
            })
            .collect();

        let mut guards: HashMap<usize, RwLockWriteGuard<'_, SpaceInner>> = HashMap::new();
        for &i in &touched {
            guards.insert(i, write_guard(&self.spaces[i])?);
        }

        if let Some(wal) = &self.wal {
            wal.append(&wal_ops, true)?;
        }

        for WalOp { seq, op } in wal_ops {
            // Membership was validated above.
            if let Some(&i) = self.index.get(op.namespace())
                && let Some(inner) = guards.get_mut(&i)
            {
                apply_op(&mut inner.mem, seq, op);
            }
        }

        for &i in &touched {
            let space = &self.spaces[i];
            if let Some(inner) = guards.get_mut(&i)
                && inner.mem.bytes() > space.write_buffer_size
            {
                Self::flush_space(space, inner)?;
            }
        }

        Ok(())
    }

    fn approximate_size(
        &self,
        ns: &str,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<u64, StoreError> {
        let space = self.space(ns)?;
        let inner = read_guard(space)?;
        let mut total = inner.mem.approximate_bytes(lower, upper);
        for run in &inner.runs {
            total += run.approximate_bytes(lower, upper);
        }
        Ok(total)
    }

    // The nominated slice widens to the whole namespace: merging every run
    // is what makes dropping tombstones safe (nothing older can resurrect
    // underneath the output).
    fn compact_range(
        &self,
        ns: &str,
        _lower: Option<&[u8]>,
        _upper: Option<&[u8]>,
        opts: CompactOptions,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let space = self.space(ns)?;
        let mut inner = write_guard(space)?;

        // Buffered mutations take part in the rewrite.
        Self::flush_space(space, &mut inner)?;
        if inner.runs.is_empty() {
            return Ok(());
        }

        let mut acc: BTreeMap<&[u8], (u64, Option<&[u8]>)> = BTreeMap::new();
        let mut tombs: Vec<&RangeTombstone> = Vec::new();
        for run in &inner.runs {
            for (key, seq, value) in run.slice(None, None) {
                merge_entry(&mut acc, key, seq, value);
            }
            tombs.extend(run.tombstones());
        }

        let mut points = Vec::new();
        for (key, (seq, value)) in acc {
            let range_deleted = tombs
                .iter()
                .any(|t| t.start.as_slice() <= key && key < t.end.as_slice() && t.seq > seq);
            match value {
                Some(value) if !range_deleted => points.push(PointRecord {
                    key: key.to_vec(),
                    seq,
                    value: Some(value.to_vec()),
                }),
                Some(_) => {}
                None if opts.skip_bottommost => points.push(PointRecord {
                    key: key.to_vec(),
                    seq,
                    value: None,
                }),
                None => {}
            }
        }
        let kept_tombs: Vec<RangeTombstone> = if opts.skip_bottommost {
            tombs.iter().map(|t| (*t).clone()).collect()
        } else {
            Vec::new()
        };

        let removed = inner.runs.len();
        let mut new_runs = Vec::new();
        if !points.is_empty() || !kept_tombs.is_empty() {
            let id = inner.next_run_id;
            inner.next_run_id += 1;
            let path = space.dir.join(format!("run-{id:06}{RUN_SUFFIX}"));
            RunWriter::new(&path).build(&points, &kept_tombs)?;
            new_runs.push(Run::open(id, &path)?);
        }

        let old_runs = std::mem::replace(&mut inner.runs, new_runs);
        for run in old_runs {
            if let Err(e) = run.delete_file() {
                warn!(ns = %space.name, %e, "failed to remove compacted run file");
            }
        }

        info!(
            ns = %space.name,
            merged = removed,
            survivors = points.len(),
            "range compaction completed"
        );
        Ok(())
    }

    fn flush(&self, _wait: bool) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut guards = self.lock_all()?;
        for (space, inner) in self.spaces.iter().zip(guards.iter_mut()) {
            Self::flush_space(space, inner)?;
        }
        // Every logged mutation is now covered by a run.
        if let Some(wal) = &self.wal {
            wal.truncate()?;
        }
        Ok(())
    }

    fn flush_wal(&self, sync: bool) -> Result<(), StoreError> {
        self.check_writable()?;
        if sync && let Some(wal) = &self.wal {
            wal.sync()?;
        }
        Ok(())
    }

    fn checkpoint(&self, path: &Path) -> Result<(), StoreError> {
        self.check_writable()?;
        fs::create_dir_all(path)?;

        let mut guards = self.lock_all()?;
        for (space, inner) in self.spaces.iter().zip(guards.iter_mut()) {
            Self::flush_space(space, inner)?;
        }
        if let Some(wal) = &self.wal {
            wal.truncate()?;
        }

        for (space, inner) in self.spaces.iter().zip(guards.iter()) {
            let dir = path.join(&space.name);
            fs::create_dir_all(&dir)?;
            for run in &inner.runs {
                if let Some(name) = run.path().file_name() {
                    fs::copy(run.path(), dir.join(name))?;
                }
            }
            File::open(&dir)?.sync_all()?;
        }

        let identity = self.root.join(IDENTITY_FILE);
        if identity.exists() {
            fs::copy(&identity, path.join(IDENTITY_FILE))?;
        }
        File::open(path)?.sync_all()?;

        info!(path = %path.display(), "checkpoint created");
        Ok(())
    }

    fn open_read_only(
        &self,
        path: &Path,
        namespaces: &[String],
    ) -> Result<Arc<dyn LeafStore>, StoreError> {
        Self::validate_namespaces(namespaces)?;
        if !path.is_dir() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no store at {}", path.display()),
            )));
        }

        let mut spaces = Vec::with_capacity(namespaces.len());
        let mut index = HashMap::new();
        let mut max_seq = 0u64;

        for (i, name) in namespaces.iter().enumerate() {
            let dir = path.join(name);
            let (runs, next_run_id, space_max_seq) = if dir.is_dir() {
                Self::load_runs(&dir)?
            } else {
                (Vec::new(), 1, 0)
            };
            max_seq = max_seq.max(space_max_seq);
            index.insert(name.clone(), i);
            spaces.push(Arc::new(Space {
                name: name.clone(),
                dir,
                write_buffer_size: usize::MAX,
                inner: RwLock::new(SpaceInner {
                    mem: Memtable::new(),
                    runs,
                    next_run_id,
                }),
            }));
        }

        debug!(path = %path.display(), "read-only store opened");
        Ok(Arc::new(LsmStore {
            root: path.to_path_buf(),
            namespaces: namespaces.to_vec(),
            index,
            spaces,
            wal: None,
            seq: AtomicU64::new(max_seq),
            read_only: true,
            closed: AtomicBool::new(false),
        }))
    }

    fn memory_usage(&self) -> StoreMemoryUsage {
        let mut usage = StoreMemoryUsage::default();
        for space in &self.spaces {
            if let Ok(inner) = space.inner.read() {
                usage.memtable_bytes += inner.mem.bytes() as u64;
                for run in &inner.runs {
                    usage.index_bytes += run.index_bytes();
                    usage.mapped_bytes += run.file_size();
                }
            }
        }
        usage
    }

    fn close(&self) -> Result<(), StoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.read_only {
            return Ok(());
        }
        self.flush(true)?;
        if let Ok(root) = File::open(&self.root) {
            let _ = root.sync_all();
        }
        info!(root = %self.root.display(), "store closed");
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Iterator
// ------------------------------------------------------------------------------------------------

/// Materialized cursor over the visible entries of one namespace slice.
///
/// The visible set is resolved once at creation (and again on `refresh`);
/// seeks and steps are index arithmetic over that snapshot, so a cursor
/// never observes writes committed after it was built.
struct LsmIter {
    space: Arc<Space>,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: Option<usize>,
}

impl LeafIter for LsmIter {
    fn seek_first(&mut self) -> Result<bool, StoreError> {
        self.pos = if self.entries.is_empty() { None } else { Some(0) };
        Ok(self.pos.is_some())
    }

    fn seek_last(&mut self) -> Result<bool, StoreError> {
        self.pos = self.entries.len().checked_sub(1);
        Ok(self.pos.is_some())
    }

    fn seek(&mut self, target: &[u8]) -> Result<bool, StoreError> {
        let idx = self
            .entries
            .partition_point(|(key, _)| key.as_slice() < target);
        self.pos = (idx < self.entries.len()).then_some(idx);
        Ok(self.pos.is_some())
    }

    fn seek_for_prev(&mut self, target: &[u8]) -> Result<bool, StoreError> {
        let idx = self
            .entries
            .partition_point(|(key, _)| key.as_slice() <= target);
        self.pos = idx.checked_sub(1);
        Ok(self.pos.is_some())
    }

    fn next(&mut self) -> Result<bool, StoreError> {
        self.pos = match self.pos {
            Some(p) if p + 1 < self.entries.len() => Some(p + 1),
            _ => None,
        };
        Ok(self.pos.is_some())
    }

    fn prev(&mut self) -> Result<bool, StoreError> {
        self.pos = self.pos.and_then(|p| p.checked_sub(1));
        Ok(self.pos.is_some())
    }

    fn is_valid(&self) -> bool {
        self.pos.is_some()
    }

    fn key(&self) -> &[u8] {
        match self.pos {
            Some(p) => &self.entries[p].0,
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.pos {
            Some(p) => &self.entries[p].1,
            None => &[],
        }
    }

    fn refresh(&mut self) -> Result<(), StoreError> {
        let inner = read_guard(&self.space)?;
        self.entries = collect_visible(&inner, self.lower.as_deref(), self.upper.as_deref());
        self.pos = None;
        Ok(())
    }
}
