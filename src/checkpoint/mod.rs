//! # Checkpoint Cache
//!
//! Checkpoints are immutable on-disk copies of the live store, one
//! directory per checkpoint id under the checkpoint root. Reading one
//! requires opening a read-only store view — an operation heavy enough to
//! be worth caching, and stateful enough (open file handles) that eviction
//! must release resources deterministically.
//!
//! The cache is keyed by checkpoint id and expires entries after an
//! inactivity timeout; any access resets the clock. Eviction runs
//! **synchronously** on the sweeper's thread and closes the underlying
//! store handles before returning, so file descriptors are released the
//! moment an entry leaves the cache. The engine invalidates single entries
//! when it deletes a checkpoint directory and invalidates everything at
//! stop.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::store::{LeafStore, StoreError};

/// Default inactivity timeout before an opened checkpoint is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Errors from opening or resolving a checkpoint view.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The checkpoint id has no directory under the checkpoint root.
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// The checkpoint directory exists but could not be opened.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

struct CacheEntry {
    view: Arc<dyn LeafStore>,
    last_access: Instant,
}

/// Content-addressed, time-expiring cache of opened read-only checkpoint
/// views.
pub(crate) struct CheckpointCache {
    /// Live store, used as the factory for read-only views.
    store: Arc<dyn LeafStore>,
    root: PathBuf,
    /// Namespace order of the live engine; views are opened with the same
    /// order so handles line up.
    namespaces: Vec<String>,
    idle_timeout: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CheckpointCache {
    pub fn new(
        store: Arc<dyn LeafStore>,
        root: PathBuf,
        namespaces: Vec<String>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            store,
            root,
            namespaces,
            idle_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Directory of `id` under the checkpoint root.
    pub fn dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Returns the opened view for `id`, opening it on first access.
    pub fn get(&self, id: &str) -> Result<Arc<dyn LeafStore>, CheckpointError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Internal("checkpoint cache lock poisoned".into()))?;

        if let Some(entry) = entries.get_mut(id) {
            entry.last_access = Instant::now();
            return Ok(Arc::clone(&entry.view));
        }

        let dir = self.dir(id);
        if !dir.is_dir() {
            return Err(CheckpointError::NotFound(id.to_string()));
        }

        let view = self.store.open_read_only(&dir, &self.namespaces)?;
        debug!(checkpoint = id, "checkpoint view opened");
        entries.insert(
            id.to_string(),
            CacheEntry {
                view: Arc::clone(&view),
                last_access: Instant::now(),
            },
        );
        Ok(view)
    }

    /// Evicts every entry idle longer than the timeout, closing each view
    /// before the sweep returns.
    pub fn sweep(&self) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_access) >= self.idle_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(entry) = entries.remove(&id) {
                close_view(&id, entry.view);
                debug!(checkpoint = %id, "idle checkpoint view evicted");
            }
        }
    }

    /// Drops and closes the view for `id`, if opened.
    pub fn invalidate(&self, id: &str) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if let Some(entry) = entries.remove(id) {
            close_view(id, entry.view);
        }
    }

    /// Drops and closes every opened view. Called at engine stop.
    pub fn invalidate_all(&self) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        for (id, entry) in entries.drain() {
            close_view(&id, entry.view);
        }
    }

    /// Number of currently opened views.
    pub fn open_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

fn close_view(id: &str, view: Arc<dyn LeafStore>) {
    if let Err(e) = view.close() {
        warn!(checkpoint = id, %e, "failed to close checkpoint view");
    }
}
