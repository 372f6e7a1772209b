//! Latency-aware range iterator.
//!
//! Wraps a leaf cursor and times every seek operation. The last ten seek
//! latencies form a ring whose running average is the *smoothed latency*;
//! when it exceeds the slow-seek threshold the iterator nominates its
//! declared `[start, end)` slice for background compaction — a degraded
//! seek usually means the slice is buried under tombstones. Steps
//! (`next`/`prev`) and reads are not measured.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{EngineError, EngineMetrics};
use crate::compact::CompactionScheduler;
use crate::store::LeafIter;

/// Ring size of the smoothed-latency window.
const SEEK_WINDOW: usize = 10;

/// Smoothed seek latency above this submits a compaction hint.
const SLOW_SEEK: Duration = Duration::from_millis(10);

/// A seekable, bidirectional cursor over `[start, end)` of one namespace,
/// with seek-latency feedback into the compaction scheduler.
///
/// Not shared across threads; each iterator owns its latency window.
pub struct EngineIterator {
    inner: Box<dyn LeafIter>,
    ns: String,
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    /// `None` for checkpoint cursors: immutable data takes no hints.
    scheduler: Option<Arc<CompactionScheduler>>,
    metrics: Arc<EngineMetrics>,

    window: [u64; SEEK_WINDOW],
    filled: usize,
    cursor: usize,
    sum: u64,
    hinted: bool,
}

impl EngineIterator {
    pub(crate) fn new(
        inner: Box<dyn LeafIter>,
        ns: String,
        start: Option<Vec<u8>>,
        end: Option<Vec<u8>>,
        scheduler: Option<Arc<CompactionScheduler>>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            inner,
            ns,
            start,
            end,
            scheduler,
            metrics,
            window: [0; SEEK_WINDOW],
            filled: 0,
            cursor: 0,
            sum: 0,
            hinted: false,
        }
    }

    /// Position on the first entry. Measured.
    pub fn seek_first(&mut self) -> Result<bool, EngineError> {
        self.measured(|iter| iter.seek_first())
    }

    /// Position on the last entry. Measured.
    pub fn seek_last(&mut self) -> Result<bool, EngineError> {
        self.measured(|iter| iter.seek_last())
    }

    /// Position on the first entry with key `>= target`. Measured.
    pub fn seek(&mut self, target: &[u8]) -> Result<bool, EngineError> {
        self.measured(|iter| iter.seek(target))
    }

    /// Position on the last entry with key `<= target`. Measured.
    pub fn seek_for_prev(&mut self, target: &[u8]) -> Result<bool, EngineError> {
        self.measured(|iter| iter.seek_for_prev(target))
    }

    /// Advance to the next entry. Not measured.
    pub fn next(&mut self) -> Result<bool, EngineError> {
        Ok(self.inner.next()?)
    }

    /// Step back to the previous entry. Not measured.
    pub fn prev(&mut self) -> Result<bool, EngineError> {
        Ok(self.inner.prev()?)
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    /// Key at the current position; only meaningful while
    /// [`EngineIterator::is_valid`] holds.
    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    /// Value at the current position; only meaningful while
    /// [`EngineIterator::is_valid`] holds.
    pub fn value(&self) -> &[u8] {
        self.inner.value()
    }

    /// Re-read the store; the cursor must seek again afterwards.
    pub fn refresh(&mut self) -> Result<(), EngineError> {
        Ok(self.inner.refresh()?)
    }

    /// The namespace this cursor reads.
    pub fn namespace(&self) -> &str {
        &self.ns
    }

    /// Smoothed seek latency over the filled window, in nanoseconds.
    pub fn smoothed_latency_nanos(&self) -> u64 {
        if self.filled == 0 {
            0
        } else {
            self.sum / self.filled as u64
        }
    }

    fn measured(
        &mut self,
        op: impl FnOnce(&mut dyn LeafIter) -> Result<bool, crate::store::StoreError>,
    ) -> Result<bool, EngineError> {
        let started = Instant::now();
        let found = op(self.inner.as_mut())?;
        self.observe(started.elapsed());
        Ok(found)
    }

    fn observe(&mut self, elapsed: Duration) {
        let nanos = elapsed.as_nanos() as u64;
        self.metrics.record_seek(nanos);

        if self.filled == SEEK_WINDOW {
            self.sum -= self.window[self.cursor];
        } else {
            self.filled += 1;
        }
        self.window[self.cursor] = nanos;
        self.sum += nanos;
        self.cursor = (self.cursor + 1) % SEEK_WINDOW;

        let smoothed = self.sum / self.filled as u64;
        if smoothed > SLOW_SEEK.as_nanos() as u64 && !self.hinted {
            // One nomination per cursor is enough; the scheduler coalesces
            // repeats anyway.
            self.hinted = true;
            if let Some(scheduler) = &self.scheduler {
                debug!(
                    ns = %self.ns,
                    smoothed_ns = smoothed,
                    "slow seeks, nominating slice for compaction"
                );
                scheduler.submit(&self.ns, self.start.as_deref(), self.end.as_deref());
            }
        }
    }
}
