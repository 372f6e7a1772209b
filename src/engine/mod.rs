//! # Engine Facade
//!
//! The public surface of the storage engine: lifecycle, identity, key
//! ranges, batches, point and range reads (against the live store or a
//! checkpoint), checkpoint creation and garbage collection, and
//! observability.
//!
//! ## Design Overview
//!
//! The engine composes four collaborators around one leaf store:
//!
//! 1. **Key ranges** — statistics cursors that arm the compaction trigger.
//! 2. **Batch registry** — buffers mutations and commits them atomically.
//! 3. **Compaction scheduler** — coalesces range hints and runs at most
//!    one background compaction at a time.
//! 4. **Checkpoint cache** — opens and expires read-only checkpoint views.
//!
//! A housekeeping thread drives two clocks: the checkpoint-cache sweep and
//! the checkpoint garbage collector. GC enumerates checkpoint directories
//! older than half the GC interval and asks the caller-supplied
//! `checkpoint_check` predicate which are still referenced; unreferenced
//! ones are invalidated in the cache and deleted. The minimum age keeps
//! freshly created checkpoints safe until the caller has observed them.
//!
//! ## Lifecycle
//!
//! `Init → Started → Stopping → Stopped`, monotonic — a stopped engine is
//! never restarted. Every data operation requires `Started`. Stop releases
//! resources in a fixed order: housekeeping, opened checkpoints, pending
//! compactions, the store, and finally the compaction worker.
//!
//! ## Guarantees
//!
//! - Batches commit atomically; range counters move only after the commit
//!   succeeded.
//! - Checkpoints are immutable: reads against a checkpoint id return the
//!   state as of its creation regardless of later writes.
//! - The engine identity survives restarts; an override supplied at
//!   creation is persisted and preferred from then on.
//! - Failures surface to the caller unrecovered, except background
//!   compaction failures during shutdown, which are logged and swallowed.

pub mod iterator;

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crossbeam::channel::{Sender, bounded, tick};
use crossbeam::select;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batch::BatchRegistry;
use crate::checkpoint::{CheckpointCache, CheckpointError, DEFAULT_IDLE_TIMEOUT};
use crate::compact::{CompactionScheduler, CompactionStats};
use crate::range::{DEFAULT_MIN_TOMBSTONE_KEYS, DEFAULT_TOMBSTONE_PERCENT, KeyRange};
use crate::store::lsm::{LsmStore, StoreOptions};
use crate::store::{DEFAULT_NAMESPACE, LeafStore, StoreError, StoreMemoryUsage};
use iterator::EngineIterator;

/// Filename of the caller-supplied identity override, one line, preferred
/// over the store-native identity when both exist.
pub const OVERRIDE_IDENTITY_FILE: &str = "OVERRIDEIDENTITY";

/// Filename of the store-native identity line.
pub const IDENTITY_FILE: &str = crate::store::lsm::IDENTITY_FILE;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// API called before `start()` or after `stop()`.
    #[error("Engine is not started")]
    NotStarted,

    /// The referenced checkpoint id has no directory.
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// A checkpoint with this id already exists.
    #[error("Checkpoint already exists: {0}")]
    CheckpointExists(String),

    /// Neither the override nor the native identity file yields a line.
    #[error("Engine identity is unreadable")]
    IdentityUnreadable,

    /// The batch id does not name an open batch.
    #[error("Unknown batch: {0}")]
    UnknownBatch(u64),

    /// A caller-supplied argument is malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Leaf-store failure during a get/put/batch/flush/compact/checkpoint.
    #[error("Store failure: {0}")]
    Store(#[from] StoreError),

    /// Filesystem error outside the store (identity write, checkpoint GC).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CheckpointError> for EngineError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::NotFound(id) => EngineError::CheckpointNotFound(id),
            CheckpointError::Store(e) => EngineError::Store(e),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Predicate telling the garbage collector whether a checkpoint id is
/// still referenced by the layer above.
pub type CheckpointCheck = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Configuration for an [`Engine`] instance. Built via
/// [`EngineConfig::new`]; every field may be adjusted before
/// [`Engine::open`].
pub struct EngineConfig {
    /// Directory of the live store.
    pub data_root: PathBuf,

    /// Directory holding one sub-directory per checkpoint.
    pub checkpoint_root: PathBuf,

    /// Namespaces of this engine, fixed at creation. `default` is always
    /// present and first; it is prepended when missing.
    pub namespaces: Vec<String>,

    /// Identity to persist on first creation, preferred over the
    /// store-native one on every subsequent load.
    pub override_identity: Option<String>,

    /// When true commits skip the write-ahead log and `flush()` forces a
    /// memtable flush instead of a log sync.
    pub disable_wal: bool,

    /// Checkpoint garbage-collection period. Checkpoints younger than half
    /// this are never deleted.
    pub gc_interval: Duration,

    /// Inactivity timeout for opened checkpoint views.
    pub checkpoint_idle_timeout: Duration,

    /// Lower bound on tombstone count before the ratio trigger fires.
    pub compact_min_tombstone_keys: u64,

    /// Tombstone-to-total ratio threshold for the trigger.
    pub compact_tombstone_percent: f64,

    /// GC referenced-checkpoint predicate. Without one, no checkpoint is
    /// ever deleted.
    pub checkpoint_check: Option<CheckpointCheck>,

    /// Leaf-store options, including per-namespace overrides.
    pub store_options: StoreOptions,
}

impl EngineConfig {
    /// Configuration with the default thresholds and a `default`-only
    /// namespace set.
    pub fn new(data_root: impl Into<PathBuf>, checkpoint_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            checkpoint_root: checkpoint_root.into(),
            namespaces: vec![DEFAULT_NAMESPACE.to_string()],
            override_identity: None,
            disable_wal: false,
            gc_interval: Duration::from_secs(300),
            checkpoint_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            compact_min_tombstone_keys: DEFAULT_MIN_TOMBSTONE_KEYS,
            compact_tombstone_percent: DEFAULT_TOMBSTONE_PERCENT,
            checkpoint_check: None,
            store_options: StoreOptions::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Observability
// ------------------------------------------------------------------------------------------------

/// Aggregated iterator seek-latency gauges.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeekLatencyStats {
    pub count: u64,
    pub total_nanos: u64,
    pub max_nanos: u64,
    pub under_1ms: u64,
    pub under_10ms: u64,
    pub under_100ms: u64,
    pub over_100ms: u64,
}

/// Capacity of the filesystem backing a root directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskSpace {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Snapshot of engine gauges returned by [`Engine::stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub seek_latency: SeekLatencyStats,
    pub data_root_disk: DiskSpace,
    pub checkpoint_root_disk: DiskSpace,
    /// Checkpoint views currently opened in the cache.
    pub opened_checkpoints: usize,
    /// Batches started but not yet ended or aborted.
    pub open_batches: usize,
    /// Key ranges registered on this engine.
    pub key_ranges: usize,
    pub compaction: CompactionStats,
    pub memory: StoreMemoryUsage,
}

pub(crate) struct EngineMetrics {
    seek_count: AtomicU64,
    seek_total_nanos: AtomicU64,
    seek_max_nanos: AtomicU64,
    seek_under_1ms: AtomicU64,
    seek_under_10ms: AtomicU64,
    seek_under_100ms: AtomicU64,
    seek_over_100ms: AtomicU64,
}

impl EngineMetrics {
    fn new() -> Self {
        Self {
            seek_count: AtomicU64::new(0),
            seek_total_nanos: AtomicU64::new(0),
            seek_max_nanos: AtomicU64::new(0),
            seek_under_1ms: AtomicU64::new(0),
            seek_under_10ms: AtomicU64::new(0),
            seek_under_100ms: AtomicU64::new(0),
            seek_over_100ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_seek(&self, nanos: u64) {
        self.seek_count.fetch_add(1, Ordering::Relaxed);
        self.seek_total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.seek_max_nanos.fetch_max(nanos, Ordering::Relaxed);
        let bucket = match nanos {
            n if n < 1_000_000 => &self.seek_under_1ms,
            n if n < 10_000_000 => &self.seek_under_10ms,
            n if n < 100_000_000 => &self.seek_under_100ms,
            _ => &self.seek_over_100ms,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SeekLatencyStats {
        SeekLatencyStats {
            count: self.seek_count.load(Ordering::Relaxed),
            total_nanos: self.seek_total_nanos.load(Ordering::Relaxed),
            max_nanos: self.seek_max_nanos.load(Ordering::Relaxed),
            under_1ms: self.seek_under_1ms.load(Ordering::Relaxed),
            under_10ms: self.seek_under_10ms.load(Ordering::Relaxed),
            under_100ms: self.seek_under_100ms.load(Ordering::Relaxed),
            over_100ms: self.seek_over_100ms.load(Ordering::Relaxed),
        }
    }
}

/// Capacity of the filesystem holding `path`, resolved against the
/// longest matching mount point.
fn disk_space(path: &Path) -> DiskSpace {
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let mut best: Option<(usize, DiskSpace)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if target.starts_with(mount) {
            let depth = mount.as_os_str().len();
            if best.map(|(d, _)| depth > d).unwrap_or(true) {
                best = Some((
                    depth,
                    DiskSpace {
                        total_bytes: disk.total_space(),
                        available_bytes: disk.available_space(),
                    },
                ));
            }
        }
    }
    best.map(|(_, space)| space).unwrap_or_default()
}

// ------------------------------------------------------------------------------------------------
// Lifecycle states
// ------------------------------------------------------------------------------------------------

const STATE_INIT: u8 = 0;
const STATE_STARTED: u8 = 1;
const STATE_STOPPING: u8 = 2;
const STATE_STOPPED: u8 = 3;

// ------------------------------------------------------------------------------------------------
// Housekeeping
// ------------------------------------------------------------------------------------------------

/// Timer thread driving the checkpoint-cache sweep and checkpoint GC.
struct Housekeeper {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl Housekeeper {
    fn spawn(
        checkpoint_root: PathBuf,
        gc_interval: Duration,
        sweep_every: Duration,
        cache: Arc<CheckpointCache>,
        check: Option<CheckpointCheck>,
    ) -> Option<Self> {
        let (shutdown, shutdown_rx) = bounded(1);
        let handle = std::thread::Builder::new()
            .name("spankv-housekeeper".into())
            .spawn(move || {
                let gc_tick = tick(gc_interval);
                let sweep_tick = tick(sweep_every);
                loop {
                    select! {
                        recv(gc_tick) -> _ => {
                            if let Some(check) = &check {
                                gc_pass(&checkpoint_root, gc_interval / 2, &cache, check);
                            }
                        }
                        recv(sweep_tick) -> _ => cache.sweep(),
                        recv(shutdown_rx) -> _ => break,
                    }
                }
            })
            .ok()?;
        Some(Self { shutdown, handle })
    }

    fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.join();
    }
}

/// One garbage-collection sweep: delete checkpoint directories older than
/// `min_age` that the caller no longer references.
fn gc_pass(root: &Path, min_age: Duration, cache: &CheckpointCache, check: &CheckpointCheck) {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(%e, root = %root.display(), "checkpoint GC cannot list root");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(id) = path.file_name().and_then(|s| s.to_str()).map(str::to_owned) else {
            continue;
        };

        let age = entry
            .metadata()
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        if age <= min_age {
            continue;
        }
        if check(&id) {
            continue;
        }

        cache.invalidate(&id);
        match fs::remove_dir_all(&path) {
            Ok(()) => info!(checkpoint = %id, "unreferenced checkpoint deleted"),
            Err(e) => warn!(checkpoint = %id, %e, "failed to delete checkpoint directory"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

struct EngineInner {
    state: AtomicU8,
    identity: String,
    namespaces: Vec<String>,
    data_root: PathBuf,
    checkpoint_root: PathBuf,
    gc_interval: Duration,
    checkpoint_idle_timeout: Duration,
    disable_wal: bool,
    compact_min_tombstone_keys: u64,
    compact_tombstone_percent: f64,
    checkpoint_check: Option<CheckpointCheck>,

    store: Arc<dyn LeafStore>,
    scheduler: Arc<CompactionScheduler>,
    cache: Arc<CheckpointCache>,
    batches: BatchRegistry,
    ranges: DashMap<u64, Arc<KeyRange>>,
    next_range_id: AtomicU64,
    metrics: Arc<EngineMetrics>,
    housekeeper: Mutex<Option<Housekeeper>>,
}

/// The storage engine handle.
///
/// Thread-safe and cheap to clone; all clones share one instance.
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Engine {
    /// Opens (or creates) an engine. The store is opened and the identity
    /// resolved here; background work begins at [`Engine::start`].
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let namespaces = normalize_namespaces(&config.namespaces);
        fs::create_dir_all(&config.data_root)?;
        fs::create_dir_all(&config.checkpoint_root)?;

        let mut store_options = config.store_options.clone();
        store_options.disable_wal = config.disable_wal;
        let store: Arc<dyn LeafStore> =
            Arc::new(LsmStore::open(&config.data_root, &namespaces, store_options)?);

        if let Some(identity) = &config.override_identity {
            let path = config.data_root.join(OVERRIDE_IDENTITY_FILE);
            if !path.exists() {
                fs::write(&path, format!("{identity}\n"))?;
            }
        }
        let identity = load_identity(&config.data_root)?;

        let scheduler = Arc::new(CompactionScheduler::new(Arc::clone(&store)));
        let cache = Arc::new(CheckpointCache::new(
            Arc::clone(&store),
            config.checkpoint_root.clone(),
            namespaces.clone(),
            config.checkpoint_idle_timeout,
        ));

        info!(
            identity = %identity,
            data_root = %config.data_root.display(),
            namespaces = namespaces.len(),
            "engine opened"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                state: AtomicU8::new(STATE_INIT),
                identity,
                namespaces,
                data_root: config.data_root,
                checkpoint_root: config.checkpoint_root,
                gc_interval: config.gc_interval,
                checkpoint_idle_timeout: config.checkpoint_idle_timeout,
                disable_wal: config.disable_wal,
                compact_min_tombstone_keys: config.compact_min_tombstone_keys,
                compact_tombstone_percent: config.compact_tombstone_percent,
                checkpoint_check: config.checkpoint_check,
                store,
                scheduler,
                cache,
                batches: BatchRegistry::new(),
                ranges: DashMap::new(),
                next_range_id: AtomicU64::new(0),
                metrics: Arc::new(EngineMetrics::new()),
                housekeeper: Mutex::new(None),
            }),
        })
    }

    /// Starts background work: the compaction scheduler begins accepting
    /// hints and the housekeeping timers begin ticking. `metric_tags` are
    /// attached to the lifecycle log for the metric layer above.
    pub fn start(&self, metric_tags: &[(&str, &str)]) -> Result<(), EngineError> {
        let inner = &self.inner;
        match inner.state.compare_exchange(
            STATE_INIT,
            STATE_STARTED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_STARTED) => return Ok(()),
            Err(_) => return Err(EngineError::NotStarted),
        }

        inner.scheduler.start();

        let sweep_every = (inner.checkpoint_idle_timeout / 10).max(Duration::from_secs(1));
        let housekeeper = Housekeeper::spawn(
            inner.checkpoint_root.clone(),
            inner.gc_interval,
            sweep_every,
            Arc::clone(&inner.cache),
            inner.checkpoint_check.clone(),
        );
        if let Ok(mut slot) = inner.housekeeper.lock() {
            *slot = housekeeper;
        }

        info!(identity = %inner.identity, ?metric_tags, "engine started");
        Ok(())
    }

    /// Stops the engine: housekeeping halts, opened checkpoints close,
    /// pending compactions drain (their failures are swallowed), the store
    /// closes, and the compaction worker terminates — in that order.
    pub fn stop(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        let previous = match inner.state.compare_exchange(
            STATE_STARTED,
            STATE_STOPPING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => STATE_STARTED,
            Err(STATE_INIT) => {
                inner.state.store(STATE_STOPPING, Ordering::SeqCst);
                STATE_INIT
            }
            // Already stopping or stopped.
            Err(_) => return Ok(()),
        };

        if previous == STATE_STARTED {
            if let Ok(mut slot) = inner.housekeeper.lock()
                && let Some(housekeeper) = slot.take()
            {
                housekeeper.stop();
            }
            inner.cache.invalidate_all();
            inner.scheduler.drain();
        }

        let close_result = inner.store.close();
        inner.scheduler.shutdown();
        inner.state.store(STATE_STOPPED, Ordering::SeqCst);

        info!(identity = %inner.identity, "engine stopped");
        close_result?;
        Ok(())
    }

    /// The stable engine identity.
    pub fn id(&self) -> &str {
        &self.inner.identity
    }

    /// Namespaces of this engine, `default` first.
    pub fn namespaces(&self) -> &[String] {
        &self.inner.namespaces
    }

    fn check_started(&self) -> Result<(), EngineError> {
        if self.inner.state.load(Ordering::SeqCst) == STATE_STARTED {
            Ok(())
        } else {
            Err(EngineError::NotStarted)
        }
    }

    // --------------------------------------------------------------------------------------------
    // Key ranges
    // --------------------------------------------------------------------------------------------

    /// Registers a statistics range over `[start, end)` of `ns`. `None`
    /// bounds are open. Ranges may overlap freely.
    pub fn new_key_range(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<Arc<KeyRange>, EngineError> {
        self.check_started()?;
        if !self.inner.namespaces.iter().any(|n| n == ns) {
            return Err(StoreError::UnknownNamespace(ns.to_string()).into());
        }

        let id = self.inner.next_range_id.fetch_add(1, Ordering::SeqCst) + 1;
        let range = Arc::new(KeyRange::new(
            id,
            ns.to_string(),
            start.map(<[u8]>::to_vec),
            end.map(<[u8]>::to_vec),
            Arc::clone(&self.inner.scheduler),
            self.inner.compact_min_tombstone_keys,
            self.inner.compact_tombstone_percent,
        ));
        self.inner.ranges.insert(id, Arc::clone(&range));
        debug!(range = id, ns, "key range registered");
        Ok(range)
    }

    /// Drops a range registration. Outstanding handles stay usable but no
    /// longer appear in [`Engine::stats`].
    pub fn drop_key_range(&self, range: &Arc<KeyRange>) {
        self.inner.ranges.remove(&range.id());
    }

    // --------------------------------------------------------------------------------------------
    // Batches
    // --------------------------------------------------------------------------------------------

    /// Opens a batch and returns its id.
    pub fn start_batch(&self) -> Result<u64, EngineError> {
        self.check_started()?;
        Ok(self.inner.batches.start())
    }

    /// Buffers a put of `key → value` against `range`'s namespace.
    pub fn batch_put(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), EngineError> {
        self.check_started()?;
        self.inner.batches.record_put(batch_id, range, key, value)
    }

    /// Buffers an insert; the caller promises `key` is absent. Inserting
    /// an existing key is a caller bug: the store overwrites, and the
    /// range's key count drifts by one.
    pub fn batch_insert(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), EngineError> {
        self.check_started()?;
        self.inner
            .batches
            .record_insert(batch_id, range, key, value)
    }

    /// Buffers a point delete.
    pub fn batch_delete(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        key: Vec<u8>,
    ) -> Result<(), EngineError> {
        self.check_started()?;
        self.inner.batches.record_delete(batch_id, range, key)
    }

    /// Buffers a range clear of `[start, end)` within `range`. Missing
    /// endpoints resolve to the first/last key of the range at commit
    /// time.
    pub fn batch_clear_sub_range(
        &self,
        batch_id: u64,
        range: &Arc<KeyRange>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        self.check_started()?;
        self.inner.batches.record_clear_sub_range(
            batch_id,
            range,
            start.map(<[u8]>::to_vec),
            end.map(<[u8]>::to_vec),
        )
    }

    /// Commits the batch atomically and folds its statistics into every
    /// touched range.
    pub fn end_batch(&self, batch_id: u64) -> Result<(), EngineError> {
        self.check_started()?;
        self.inner.batches.end(batch_id, self.inner.store.as_ref())
    }

    /// Discards the batch; touched ranges are left untouched.
    pub fn abort_batch(&self, batch_id: u64) -> Result<(), EngineError> {
        self.check_started()?;
        self.inner.batches.abort(batch_id)
    }

    // --------------------------------------------------------------------------------------------
    // Direct mutation helpers
    // --------------------------------------------------------------------------------------------

    /// Single-mutation put.
    pub fn put(
        &self,
        range: &Arc<KeyRange>,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), EngineError> {
        let batch_id = self.start_batch()?;
        self.batch_put(batch_id, range, key, value)?;
        self.end_batch(batch_id)
    }

    /// Single-mutation insert of a promised-absent key.
    pub fn insert(
        &self,
        range: &Arc<KeyRange>,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), EngineError> {
        let batch_id = self.start_batch()?;
        self.batch_insert(batch_id, range, key, value)?;
        self.end_batch(batch_id)
    }

    /// Single-mutation point delete.
    pub fn delete(&self, range: &Arc<KeyRange>, key: Vec<u8>) -> Result<(), EngineError> {
        let batch_id = self.start_batch()?;
        self.batch_delete(batch_id, range, key)?;
        self.end_batch(batch_id)
    }

    /// Single-mutation range clear.
    pub fn clear_sub_range(
        &self,
        range: &Arc<KeyRange>,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        let batch_id = self.start_batch()?;
        self.batch_clear_sub_range(batch_id, range, start, end)?;
        self.end_batch(batch_id)
    }

    // --------------------------------------------------------------------------------------------
    // Reads — live store
    // --------------------------------------------------------------------------------------------

    /// Existence probe; may report `true` for an absent key.
    pub fn exist(&self, ns: &str, key: &[u8]) -> Result<bool, EngineError> {
        self.check_started()?;
        Ok(self.inner.store.may_exist(ns, key)?)
    }

    /// Point lookup.
    pub fn get(&self, ns: &str, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.check_started()?;
        Ok(self.inner.store.get(ns, key)?)
    }

    /// Latency-monitored cursor over `[start, end)` of `ns`.
    pub fn iterator(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<EngineIterator, EngineError> {
        self.check_started()?;
        let iter = self.inner.store.iterator(ns, start, end)?;
        Ok(EngineIterator::new(
            iter,
            ns.to_string(),
            start.map(<[u8]>::to_vec),
            end.map(<[u8]>::to_vec),
            Some(Arc::clone(&self.inner.scheduler)),
            Arc::clone(&self.inner.metrics),
        ))
    }

    /// Estimated bytes held for `[start, end)` of `ns`, memtable and disk
    /// included.
    pub fn approximate_size(
        &self,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<u64, EngineError> {
        self.check_started()?;
        Ok(self.inner.store.approximate_size(ns, start, end)?)
    }

    // --------------------------------------------------------------------------------------------
    // Reads — checkpoints
    // --------------------------------------------------------------------------------------------

    /// Existence probe against a checkpoint.
    pub fn checkpoint_exist(
        &self,
        checkpoint_id: &str,
        ns: &str,
        key: &[u8],
    ) -> Result<bool, EngineError> {
        self.check_started()?;
        let view = self.inner.cache.get(checkpoint_id)?;
        Ok(view.may_exist(ns, key)?)
    }

    /// Point lookup against a checkpoint.
    pub fn checkpoint_get(
        &self,
        checkpoint_id: &str,
        ns: &str,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, EngineError> {
        self.check_started()?;
        let view = self.inner.cache.get(checkpoint_id)?;
        Ok(view.get(ns, key)?)
    }

    /// Cursor over a checkpoint. Seeks are measured for the latency
    /// gauges but never produce compaction hints — the data is immutable.
    pub fn checkpoint_iterator(
        &self,
        checkpoint_id: &str,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<EngineIterator, EngineError> {
        self.check_started()?;
        let view = self.inner.cache.get(checkpoint_id)?;
        let iter = view.iterator(ns, start, end)?;
        Ok(EngineIterator::new(
            iter,
            ns.to_string(),
            start.map(<[u8]>::to_vec),
            end.map(<[u8]>::to_vec),
            None,
            Arc::clone(&self.inner.metrics),
        ))
    }

    /// Size estimate against a checkpoint.
    pub fn checkpoint_approximate_size(
        &self,
        checkpoint_id: &str,
        ns: &str,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Result<u64, EngineError> {
        self.check_started()?;
        let view = self.inner.cache.get(checkpoint_id)?;
        Ok(view.approximate_size(ns, start, end)?)
    }

    // --------------------------------------------------------------------------------------------
    // Checkpoints & flush
    // --------------------------------------------------------------------------------------------

    /// Creates an immutable checkpoint named `id`.
    pub fn checkpoint(&self, id: &str) -> Result<(), EngineError> {
        self.check_started()?;
        validate_checkpoint_id(id)?;

        let dir = self.inner.cache.dir(id);
        if dir.exists() {
            return Err(EngineError::CheckpointExists(id.to_string()));
        }

        self.flush()?;
        self.inner.store.checkpoint(&dir)?;
        info!(checkpoint = id, "checkpoint created");
        Ok(())
    }

    /// Whether a checkpoint directory named `id` exists.
    pub fn has_checkpoint(&self, id: &str) -> Result<bool, EngineError> {
        self.check_started()?;
        validate_checkpoint_id(id)?;
        Ok(self.inner.cache.dir(id).is_dir())
    }

    /// Makes committed writes durable: syncs the log, or — when the log is
    /// disabled — forces a memtable flush.
    pub fn flush(&self) -> Result<(), EngineError> {
        self.check_started()?;
        if self.inner.disable_wal {
            self.inner.store.flush(true)?;
        } else {
            self.inner.store.flush_wal(true)?;
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Observability
    // --------------------------------------------------------------------------------------------

    /// Current engine gauges.
    pub fn stats(&self) -> EngineStats {
        let inner = &self.inner;
        EngineStats {
            seek_latency: inner.metrics.snapshot(),
            data_root_disk: disk_space(&inner.data_root),
            checkpoint_root_disk: disk_space(&inner.checkpoint_root),
            opened_checkpoints: inner.cache.open_count(),
            open_batches: inner.batches.open_count(),
            key_ranges: inner.ranges.len(),
            compaction: inner.scheduler.stats(),
            memory: inner.store.memory_usage(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

/// Deduplicates the configured namespaces and guarantees `default` comes
/// first.
fn normalize_namespaces(configured: &[String]) -> Vec<String> {
    let mut namespaces = vec![DEFAULT_NAMESPACE.to_string()];
    for ns in configured {
        if !namespaces.contains(ns) {
            namespaces.push(ns.clone());
        }
    }
    namespaces
}

/// First non-empty line of the override identity, else of the store-native
/// identity.
fn load_identity(data_root: &Path) -> Result<String, EngineError> {
    for file in [OVERRIDE_IDENTITY_FILE, IDENTITY_FILE] {
        let path = data_root.join(file);
        if !path.exists() {
            continue;
        }
        let content = fs::read_to_string(&path)?;
        if let Some(line) = content.lines().next() {
            let line = line.trim();
            if !line.is_empty() {
                return Ok(line.to_string());
            }
        }
    }
    Err(EngineError::IdentityUnreadable)
}

fn validate_checkpoint_id(id: &str) -> Result<(), EngineError> {
    if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
        return Err(EngineError::InvalidArgument(format!(
            "checkpoint id is not path-safe: {id:?}"
        )));
    }
    Ok(())
}
