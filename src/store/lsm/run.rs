//! Immutable sorted run files.
//!
//! A run is the on-disk unit produced by a memtable flush or a range
//! compaction: a sorted set of sequence-stamped point records plus the
//! range tombstones that were live at write time. Runs are never modified;
//! compaction replaces whole runs.
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC_LE][VERSION_LE]
//! [POINT_COUNT_LE]  [seq][kind][key]([value])  ...
//! [RANGE_COUNT_LE]  [seq][start][end]          ...
//! [BODY_CRC32_LE]
//! ```
//!
//! Readers memory-map the file, verify the checksum once, and build a
//! resident key index (key, sequence, value offset) plus a bloom filter
//! rebuilt from the indexed keys. Values stay on disk and are served
//! straight from the mapping.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use tracing::trace;

use super::super::StoreError;
use super::codec::{self, Reader};
use super::{PointRecord, RangeTombstone};

const RUN_MAGIC: u32 = 0x5350_5231; // "SPR1"
const RUN_VERSION: u32 = 1;
const BLOOM_FP_RATE: f64 = 0.01;

const KIND_PUT: u8 = 0;
const KIND_DELETE: u8 = 1;

// ------------------------------------------------------------------------------------------------
// Writer
// ------------------------------------------------------------------------------------------------

/// Builds a run file from already-sorted, deduplicated records.
///
/// `points` must be sorted ascending by key with at most one record per
/// key; `ranges` carry the tombstones verbatim. The file is fsynced, and
/// so is its parent directory, before `build` returns.
pub(crate) struct RunWriter {
    path: PathBuf,
}

impl RunWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn build(
        self,
        points: &[PointRecord],
        ranges: &[RangeTombstone],
    ) -> Result<(), StoreError> {
        let mut body = Vec::new();
        codec::put_u32(&mut body, RUN_MAGIC);
        codec::put_u32(&mut body, RUN_VERSION);

        codec::put_u32(&mut body, points.len() as u32);
        for record in points {
            codec::put_u64(&mut body, record.seq);
            match &record.value {
                Some(value) => {
                    body.push(KIND_PUT);
                    codec::put_bytes(&mut body, &record.key);
                    codec::put_bytes(&mut body, value);
                }
                None => {
                    body.push(KIND_DELETE);
                    codec::put_bytes(&mut body, &record.key);
                }
            }
        }

        codec::put_u32(&mut body, ranges.len() as u32);
        for tomb in ranges {
            codec::put_u64(&mut body, tomb.seq);
            codec::put_bytes(&mut body, &tomb.start);
            codec::put_bytes(&mut body, &tomb.end);
        }

        let mut hasher = Crc32::new();
        hasher.update(&body);
        let crc = hasher.finalize();
        codec::put_u32(&mut body, crc);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        file.write_all(&body)?;
        file.sync_all()?;

        if let Some(parent) = self.path.parent() {
            File::open(parent)?.sync_all()?;
        }

        trace!(
            path = %self.path.display(),
            points = points.len(),
            ranges = ranges.len(),
            "run written"
        );
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// One indexed point record: key and sequence resident, value on disk.
struct IndexEntry {
    key: Vec<u8>,
    seq: u64,
    /// `(offset, len)` into the mapping for a put, `None` for a tombstone.
    value: Option<(usize, usize)>,
}

/// A hit returned by [`Run::get`].
pub(crate) struct RunHit<'a> {
    pub seq: u64,
    /// `None` means the key is point-deleted at `seq`.
    pub value: Option<&'a [u8]>,
}

/// An opened, immutable run.
///
/// # Safety
///
/// Uses `unsafe { Mmap::map(...) }`; memory-safe because run files are
/// never modified or truncated while a reader holds them — compaction
/// deletes files only after the owning `Run` has been dropped.
pub(crate) struct Run {
    pub id: u64,
    path: PathBuf,
    mmap: Mmap,
    index: Vec<IndexEntry>,
    tombstones: Vec<RangeTombstone>,
    bloom: Option<Bloom<[u8]>>,
    pub min_seq: u64,
    pub max_seq: u64,
}

impl Run {
    /// Opens `path`, verifies the body checksum, and builds the resident
    /// index and bloom filter.
    pub fn open(id: u64, path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < 16 {
            return Err(StoreError::Corruption("run file too small".into()));
        }

        let body = &mmap[..mmap.len() - 4];
        let stored_crc = u32::from_le_bytes([
            mmap[mmap.len() - 4],
            mmap[mmap.len() - 3],
            mmap[mmap.len() - 2],
            mmap[mmap.len() - 1],
        ]);
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored_crc {
            return Err(StoreError::Corruption(format!(
                "run checksum mismatch: {}",
                path.display()
            )));
        }

        let mut reader = Reader::new(body);
        if reader.u32()? != RUN_MAGIC {
            return Err(StoreError::Corruption("run magic mismatch".into()));
        }
        let version = reader.u32()?;
        if version != RUN_VERSION {
            return Err(StoreError::Corruption(format!(
                "unsupported run version {version}"
            )));
        }

        let point_count = reader.u32()? as usize;
        let mut index = Vec::with_capacity(point_count);
        let mut min_seq = u64::MAX;
        let mut max_seq = 0u64;

        for _ in 0..point_count {
            let seq = reader.u64()?;
            let kind = reader.u8()?;
            let key = reader.bytes()?.to_vec();
            let value = match kind {
                KIND_PUT => {
                    let len = reader.u32()? as usize;
                    let offset = reader.position();
                    reader.skip(len)?;
                    Some((offset, len))
                }
                KIND_DELETE => None,
                other => {
                    return Err(StoreError::Corruption(format!(
                        "unknown record kind {other}"
                    )));
                }
            };
            min_seq = min_seq.min(seq);
            max_seq = max_seq.max(seq);
            index.push(IndexEntry { key, seq, value });
        }

        let range_count = reader.u32()? as usize;
        let mut tombstones = Vec::with_capacity(range_count);
        for _ in 0..range_count {
            let seq = reader.u64()?;
            let start = reader.bytes()?.to_vec();
            let end = reader.bytes()?.to_vec();
            min_seq = min_seq.min(seq);
            max_seq = max_seq.max(seq);
            tombstones.push(RangeTombstone { start, end, seq });
        }

        if min_seq == u64::MAX {
            min_seq = 0;
        }

        let bloom = if index.is_empty() {
            None
        } else {
            let mut bloom: Bloom<[u8]> = Bloom::new_for_fp_rate(index.len(), BLOOM_FP_RATE)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            for entry in &index {
                bloom.set(&entry.key);
            }
            Some(bloom)
        };

        Ok(Self {
            id,
            path,
            mmap,
            index,
            tombstones,
            bloom,
            min_seq,
            max_seq,
        })
    }

    /// Whether the key might be present as a point record. False is
    /// authoritative; true may be a false positive.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        match &self.bloom {
            Some(bloom) => bloom.check(key),
            None => false,
        }
    }

    /// Point lookup. Resolves against this run's point records only;
    /// range tombstones are the caller's concern (they shadow across
    /// runs, not just within one).
    pub fn get(&self, key: &[u8]) -> Option<RunHit<'_>> {
        if !self.may_contain(key) {
            return None;
        }
        let idx = self
            .index
            .binary_search_by(|entry| entry.key.as_slice().cmp(key))
            .ok()?;
        let entry = &self.index[idx];
        Some(RunHit {
            seq: entry.seq,
            value: entry.value.map(|(off, len)| &self.mmap[off..off + len]),
        })
    }

    /// Point records with keys in `[lower, upper)`, ascending.
    pub fn slice<'a>(
        &'a self,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> impl Iterator<Item = (&'a [u8], u64, Option<&'a [u8]>)> + 'a {
        let start = match lower {
            Some(lo) => self.index.partition_point(|e| e.key.as_slice() < lo),
            None => 0,
        };
        let end = match upper {
            Some(up) => self.index.partition_point(|e| e.key.as_slice() < up),
            None => self.index.len(),
        };
        self.index[start..end].iter().map(|entry| {
            (
                entry.key.as_slice(),
                entry.seq,
                entry.value.map(|(off, len)| &self.mmap[off..off + len]),
            )
        })
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

    /// All range tombstones in this run.
    pub fn tombstones(&self) -> &[RangeTombstone] {
        &self.tombstones
    }

    /// Estimated bytes held for keys in `[lower, upper)`: key and value
    /// lengths plus fixed per-record overhead.
    pub fn approximate_bytes(&self, lower: Option<&[u8]>, upper: Option<&[u8]>) -> u64 {
        self.slice(lower, upper)
            .map(|(key, _, value)| {
                13 + key.len() as u64 + value.map(|v| v.len() as u64 + 4).unwrap_or(0)
            })
            .sum()
    }

    pub fn point_count(&self) -> usize {
        self.index.len()
    }

    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Resident bytes of the key index.
    pub fn index_bytes(&self) -> u64 {
        self.index
            .iter()
            .map(|e| e.key.len() as u64 + 24)
            .sum::<u64>()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the backing file. Must only be called once the run has been
    /// unlinked from the namespace's live set.
    pub fn delete_file(self) -> Result<(), StoreError> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(&path)?;
        Ok(())
    }
}
