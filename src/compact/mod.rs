//! # Compaction Scheduler
//!
//! Accepts range-compaction hints from two sources — key ranges whose
//! write statistics crossed the tombstone trigger, and iterators whose
//! smoothed seek latency degraded — and turns the stream of hints into a
//! small number of actual background compactions.
//!
//! ## Hint accumulation
//!
//! Hints are kept per namespace in an ordered map `start → end`, where an
//! open lower bound is normalized to the empty key (which sorts before
//! every real key) and an open upper bound is `None`. Submitting a hint
//! whose start is already present narrows the stored end (an unbounded end
//! always wins); widening is deferred to the coalescing pass.
//!
//! ## Coalesce & dispatch
//!
//! A pass begins by flipping the `compacting` flag from idle to running.
//! For each namespace the lowest-keyed hint is polled and then fused with
//! every following hint whose start overlaps or touches the accumulated
//! interval, taking the widest end. One compaction per namespace is
//! dispatched per pass; leftovers stay in the map and the worker re-kicks
//! the scheduler after the pass settles.
//!
//! ## Concurrency
//!
//! A single dedicated worker thread executes compactions, so they are
//! serialized while reads and writes proceed in parallel. Identical
//! `(namespace, start, end)` tasks share one in-flight execution. Hints
//! submitted while the engine is not accepting (not yet started, or
//! stopping) are silently dropped. Shutdown drains in-flight work and
//! swallows its failures.

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, info, warn};

use crate::store::{CompactOptions, LeafStore};

// ------------------------------------------------------------------------------------------------
// Task type
// ------------------------------------------------------------------------------------------------

/// One coalesced compaction: a namespace slice `[start, end)`.
///
/// An empty `start` means no lower bound; `end == None` means no upper
/// bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CompactTask {
    pub ns: String,
    pub start: Vec<u8>,
    pub end: Option<Vec<u8>>,
}

enum WorkerMsg {
    Run(Vec<CompactTask>),
    /// Reply once every previously queued task has settled.
    Barrier(Sender<()>),
    Shutdown,
}

// ------------------------------------------------------------------------------------------------
// Scheduler
// ------------------------------------------------------------------------------------------------

struct Shared {
    store: Arc<dyn LeafStore>,
    /// Per-namespace ordered hint map: start key → end bound.
    hints: Mutex<HashMap<String, BTreeMap<Vec<u8>, Option<Vec<u8>>>>>,
    /// Idle/running guard for the coalesce-and-dispatch pass.
    compacting: AtomicBool,
    /// Dedup of identical in-flight tasks.
    inflight: Mutex<HashSet<CompactTask>>,
    /// Whether new hints and passes are accepted (engine is started).
    accepting: AtomicBool,
    /// Tasks queued or running.
    pending: AtomicUsize,
    completed: AtomicU64,
    total_duration_ms: AtomicU64,
    last_duration_ms: AtomicU64,
    tx: Sender<WorkerMsg>,
}

/// Snapshot of scheduler counters for [`Engine::stats`](crate::Engine::stats).
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactionStats {
    /// Compactions queued or executing right now.
    pub inflight: usize,
    /// Compactions completed since the engine was created.
    pub completed: u64,
    /// Cumulative wall-clock time spent compacting, in milliseconds.
    pub total_duration_ms: u64,
    /// Duration of the most recent compaction, in milliseconds.
    pub last_duration_ms: u64,
}

pub(crate) struct CompactionScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CompactionScheduler {
    /// Creates the scheduler and spawns its worker thread. Hints are
    /// refused until [`CompactionScheduler::start`] is called.
    pub fn new(store: Arc<dyn LeafStore>) -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            store,
            hints: Mutex::new(HashMap::new()),
            compacting: AtomicBool::new(false),
            inflight: Mutex::new(HashSet::new()),
            accepting: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            last_duration_ms: AtomicU64::new(0),
            tx,
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("spankv-compact".into())
            .spawn(move || worker_loop(worker_shared, rx));

        Self {
            shared,
            worker: Mutex::new(handle.ok()),
        }
    }

    /// Begin accepting hints and dispatching passes.
    pub fn start(&self) {
        self.shared.accepting.store(true, Ordering::SeqCst);
    }

    /// Submit a hint for `[start, end)` in `ns`. Never fails; dropped
    /// silently when the scheduler is not accepting.
    pub fn submit(&self, ns: &str, start: Option<&[u8]>, end: Option<&[u8]>) {
        let shared = &self.shared;
        if !shared.accepting.load(Ordering::SeqCst) {
            return;
        }

        let start = start.unwrap_or_default().to_vec();
        let end = end.map(<[u8]>::to_vec);
        {
            let Ok(mut hints) = shared.hints.lock() else {
                return;
            };
            let map = hints.entry(ns.to_string()).or_default();
            match map.entry(start) {
                std::collections::btree_map::Entry::Vacant(slot) => {
                    slot.insert(end);
                }
                std::collections::btree_map::Entry::Occupied(mut slot) => {
                    // Same start submitted twice: an unbounded end wins,
                    // otherwise keep the narrower one. The coalescing pass
                    // widens across starts.
                    let merged = match (slot.get().clone(), end) {
                        (None, _) | (_, None) => None,
                        (Some(a), Some(b)) => Some(a.min(b)),
                    };
                    slot.insert(merged);
                }
            }
        }
        debug!(ns, "compaction hint accepted");
        try_dispatch(shared);
    }

    /// Stop accepting hints, then block until every queued and running
    /// compaction has settled.
    pub fn drain(&self) {
        self.shared.accepting.store(false, Ordering::SeqCst);
        let (reply_tx, reply_rx) = bounded(1);
        if self.shared.tx.send(WorkerMsg::Barrier(reply_tx)).is_ok() {
            let _ = reply_rx.recv();
        }
    }

    /// Terminate the worker thread. Call after [`CompactionScheduler::drain`].
    pub fn shutdown(&self) {
        let _ = self.shared.tx.send(WorkerMsg::Shutdown);
        if let Ok(mut worker) = self.worker.lock()
            && let Some(handle) = worker.take()
        {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> CompactionStats {
        CompactionStats {
            inflight: self.shared.pending.load(Ordering::SeqCst),
            completed: self.shared.completed.load(Ordering::SeqCst),
            total_duration_ms: self.shared.total_duration_ms.load(Ordering::SeqCst),
            last_duration_ms: self.shared.last_duration_ms.load(Ordering::SeqCst),
        }
    }

    /// Pending hint count across namespaces (test and stats aid).
    pub fn pending_hints(&self) -> usize {
        self.shared
            .hints
            .lock()
            .map(|hints| hints.values().map(BTreeMap::len).sum::<usize>())
            .unwrap_or(0)
    }
}

impl Drop for CompactionScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ------------------------------------------------------------------------------------------------
// Dispatch
// ------------------------------------------------------------------------------------------------

/// Runs one coalesce-and-dispatch pass if the scheduler is idle.
fn try_dispatch(shared: &Arc<Shared>) {
    if !shared.accepting.load(Ordering::SeqCst) {
        return;
    }
    if shared
        .compacting
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let mut tasks = {
        let Ok(mut hints) = shared.hints.lock() else {
            shared.compacting.store(false, Ordering::SeqCst);
            return;
        };
        let mut tasks = Vec::new();
        for (ns, map) in hints.iter_mut() {
            if let Some(task) = coalesce_first(ns, map) {
                tasks.push(task);
            }
        }
        hints.retain(|_, map| !map.is_empty());
        tasks
    };

    // Identical tasks already queued or running are satisfied by the
    // in-flight execution.
    if let Ok(mut inflight) = shared.inflight.lock() {
        tasks.retain(|task| inflight.insert(task.clone()));
    }

    if tasks.is_empty() {
        shared.compacting.store(false, Ordering::SeqCst);
        return;
    }

    let count = tasks.len();
    shared.pending.fetch_add(count, Ordering::SeqCst);
    debug!(count, "compaction pass dispatched");
    if shared.tx.send(WorkerMsg::Run(tasks)).is_err() {
        shared.pending.fetch_sub(count, Ordering::SeqCst);
        shared.compacting.store(false, Ordering::SeqCst);
    }
}

/// Polls the lowest-keyed hint of `map` and fuses every following hint
/// whose start overlaps or touches the accumulated interval.
fn coalesce_first(ns: &str, map: &mut BTreeMap<Vec<u8>, Option<Vec<u8>>>) -> Option<CompactTask> {
    let (start, mut end) = map.pop_first()?;

    loop {
        let Some((next_start, next_end)) = map.first_key_value() else {
            break;
        };
        let fuses = match &end {
            // Unbounded interval swallows everything after it.
            None => true,
            Some(end_key) => next_start <= end_key,
        };
        if !fuses {
            break;
        }
        end = match (end, next_end) {
            (None, _) | (_, None) => None,
            (Some(a), Some(b)) => Some(a.max(b.clone())),
        };
        map.pop_first();
    }

    Some(CompactTask {
        ns: ns.to_string(),
        start,
        end,
    })
}

// ------------------------------------------------------------------------------------------------
// Worker
// ------------------------------------------------------------------------------------------------

fn worker_loop(shared: Arc<Shared>, rx: Receiver<WorkerMsg>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            WorkerMsg::Run(tasks) => {
                for task in tasks {
                    execute(&shared, &task);
                }
                shared.compacting.store(false, Ordering::SeqCst);

                // Hints that arrived (or were left over) during the pass
                // get their own pass.
                let leftovers = shared
                    .hints
                    .lock()
                    .map(|hints| hints.values().any(|map| !map.is_empty()))
                    .unwrap_or(false);
                if leftovers {
                    try_dispatch(&shared);
                }
            }
            WorkerMsg::Barrier(reply) => {
                let _ = reply.send(());
            }
            WorkerMsg::Shutdown => break,
        }
    }
}

fn execute(shared: &Arc<Shared>, task: &CompactTask) {
    let lower = (!task.start.is_empty()).then_some(task.start.as_slice());
    let upper = task.end.as_deref();

    let started = Instant::now();
    let result = shared
        .store
        .compact_range(&task.ns, lower, upper, CompactOptions::default());
    let elapsed_ms = started.elapsed().as_millis() as u64;

    shared.completed.fetch_add(1, Ordering::SeqCst);
    shared.total_duration_ms.fetch_add(elapsed_ms, Ordering::SeqCst);
    shared.last_duration_ms.store(elapsed_ms, Ordering::SeqCst);
    shared.pending.fetch_sub(1, Ordering::SeqCst);
    if let Ok(mut inflight) = shared.inflight.lock() {
        inflight.remove(task);
    }

    match result {
        Ok(()) => info!(ns = %task.ns, elapsed_ms, "background compaction finished"),
        // Background failures (including those racing a shutdown) are
        // logged and swallowed; the store stays authoritative.
        Err(e) => warn!(ns = %task.ns, %e, "background compaction failed"),
    }
}
