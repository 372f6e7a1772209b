//! # SpanKV
//!
//! A **namespaced, range-aware embedded key/value storage engine** with
//! transactional batch writes, immutable named checkpoints, approximate
//! size estimation, and an adaptive range-compaction scheduler. Built to
//! sit beneath a distributed message broker's metadata and routing
//! subsystems, where heavy tombstone and range-delete churn must not
//! degrade scans.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Engine                           │
//! │  ┌───────────┐  ┌────────────┐  ┌────────────────────┐  │
//! │  │ Key Ranges│  │  Batches   │  │  Checkpoint Cache  │  │
//! │  │ (stats +  │  │ (atomic    │  │  (read-only views, │  │
//! │  │  trigger) │  │  commit)   │  │   timed eviction)  │  │
//! │  └─────┬─────┘  └─────┬──────┘  └─────────┬──────────┘  │
//! │        │ hints        │ write batch       │ open        │
//! │  ┌─────▼──────────┐   │                   │             │
//! │  │   Compaction   │   │                   │             │
//! │  │   Scheduler    │   │                   │             │
//! │  └─────┬──────────┘   │                   │             │
//! │        ▼              ▼                   ▼             │
//! │  ┌─────────────────────────────────────────────────┐    │
//! │  │           Leaf store (pluggable)                │    │
//! │  │   namespaces · iterators · batches · runs       │    │
//! │  └─────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Public facade — lifecycle, identity, reads, writes, checkpoints, GC |
//! | [`range`] | Key ranges: per-range statistics and the compaction trigger |
//! | [`batch`] | Atomic write batches and their lowering to store operations |
//! | [`checkpoint`] | Time-expiring cache of opened checkpoint views |
//! | [`compact`] | Hint coalescing and the background compaction worker |
//! | [`store`] | Leaf store capability surface and the default implementation |
//!
//! ## Key Features
//!
//! - **Namespaces** — disjoint key subspaces over one store, fixed at
//!   creation; the `default` namespace always enumerates first.
//! - **Adaptive compaction** — ranges submit hints when tombstone load
//!   crosses a threshold; slow iterator seeks submit hints too; the
//!   scheduler coalesces overlapping hints and runs one compaction at a
//!   time.
//! - **Checkpoints** — immutable on-disk snapshots addressed by id, read
//!   through a cache that evicts idle views and closes them synchronously.
//! - **Stable identity** — persisted on first creation, override-able, and
//!   constant across restarts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spankv::{Engine, EngineConfig};
//!
//! let mut config = EngineConfig::new("/tmp/span/data", "/tmp/span/checkpoints");
//! config.namespaces.push("meta".to_string());
//!
//! let engine = Engine::open(config).unwrap();
//! engine.start(&[("cluster", "local")]).unwrap();
//!
//! // Writes go through a key range.
//! let range = engine.new_key_range("meta", None, None).unwrap();
//! engine.put(&range, b"topic/a".to_vec(), b"payload".to_vec()).unwrap();
//!
//! // Reads.
//! assert_eq!(
//!     engine.get("meta", b"topic/a").unwrap(),
//!     Some(b"payload".to_vec())
//! );
//!
//! // Checkpoint, then read the frozen state later.
//! engine.checkpoint("cp1").unwrap();
//! assert!(engine.has_checkpoint("cp1").unwrap());
//!
//! engine.stop().unwrap();
//! ```

#![allow(dead_code)]

pub mod batch;
pub mod checkpoint;
pub mod compact;
pub mod engine;
pub mod range;
pub mod store;

pub use compact::CompactionStats;
pub use engine::iterator::EngineIterator;
pub use engine::{
    CheckpointCheck, DiskSpace, Engine, EngineConfig, EngineError, EngineStats, SeekLatencyStats,
};
pub use range::KeyRange;
pub use store::lsm::{LsmStore, NamespaceOptions, StoreOptions};
pub use store::{
    CompactOptions, DEFAULT_NAMESPACE, LeafIter, LeafStore, StoreError, StoreMemoryUsage, WriteOp,
};
