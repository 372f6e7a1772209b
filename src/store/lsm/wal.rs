//! Store-wide write-ahead log.
//!
//! A single append-only file records every committed batch as one
//! CRC-protected frame, making the batch the unit of atomicity across all
//! namespaces. Replay on open rebuilds the memtables; a truncated or
//! corrupt tail ends replay at the last intact frame and is cut off so
//! subsequent appends start from a clean boundary.
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC_LE][VERSION_LE]
//! [FRAME_LEN_LE][FRAME_BYTES][FRAME_CRC32_LE]
//! [FRAME_LEN_LE][FRAME_BYTES][FRAME_CRC32_LE]
//! ...
//! ```
//!
//! A frame encodes one batch: an op count followed by sequence-stamped
//! mutations. The file is truncated back to the bare header after a full
//! flush — every surviving memtable entry is then covered by a run.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc32fast::Hasher as Crc32;
use tracing::{debug, warn};

use super::super::{StoreError, WriteOp};
use super::codec::{self, Reader};

const WAL_MAGIC: u32 = 0x5350_4C31; // "SPL1"
const WAL_VERSION: u32 = 1;
const WAL_HEADER_SIZE: u64 = 8;

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;
const OP_DELETE_RANGE: u8 = 2;

/// A sequence-stamped mutation, as recorded in (and replayed from) the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WalOp {
    pub seq: u64,
    pub op: WriteOp,
}

/// The append side of the log. Appends are serialized through an internal
/// mutex; the file handle is shared with no other component.
pub(crate) struct Wal {
    file: Mutex<File>,
    path: PathBuf,
}

impl Wal {
    /// Opens (or creates) the log at `path` and replays every intact frame.
    ///
    /// Returns the log handle plus the replayed batches in append order.
    /// A corrupt or truncated tail is logged, cut off, and ignored.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<Vec<WalOp>>), StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        let mut batches = Vec::new();

        if len == 0 {
            let mut header = Vec::with_capacity(WAL_HEADER_SIZE as usize);
            codec::put_u32(&mut header, WAL_MAGIC);
            codec::put_u32(&mut header, WAL_VERSION);
            file.write_all(&header)?;
            file.sync_all()?;
        } else {
            let mut buf = Vec::with_capacity(len as usize);
            file.seek(SeekFrom::Start(0))?;
            file.read_to_end(&mut buf)?;

            let mut reader = Reader::new(&buf);
            let magic = reader.u32()?;
            let version = reader.u32()?;
            if magic != WAL_MAGIC {
                return Err(StoreError::Corruption("log magic mismatch".into()));
            }
            if version != WAL_VERSION {
                return Err(StoreError::Corruption(format!(
                    "unsupported log version {version}"
                )));
            }

            let mut good_end = WAL_HEADER_SIZE;
            loop {
                match Self::read_frame(&mut reader) {
                    Ok(Some(batch)) => {
                        batches.push(batch);
                        good_end = reader.position() as u64;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%e, offset = good_end, "log tail unreadable, truncating");
                        break;
                    }
                }
            }

            if good_end < len {
                file.set_len(good_end)?;
                file.sync_all()?;
            }
            file.seek(SeekFrom::End(0))?;
        }

        debug!(path = %path.display(), replayed = batches.len(), "log opened");
        Ok((
            Self {
                file: Mutex::new(file),
                path,
            },
            batches,
        ))
    }

    /// Appends one batch as a single frame. When `sync` is set the file is
    /// fsynced before returning, making the batch durable.
    pub fn append(&self, ops: &[WalOp], sync: bool) -> Result<(), StoreError> {
        let mut payload = Vec::new();
        codec::put_u32(&mut payload, ops.len() as u32);
        for wal_op in ops {
            Self::encode_op(&mut payload, wal_op);
        }

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(payload.len() + 8);
        codec::put_u32(&mut frame, payload.len() as u32);
        frame.extend_from_slice(&payload);
        codec::put_u32(&mut frame, crc);

        let mut file = self
            .file
            .lock()
            .map_err(|_| StoreError::Internal("log mutex poisoned".into()))?;
        file.write_all(&frame)?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Fsyncs the log file.
    pub fn sync(&self) -> Result<(), StoreError> {
        let file = self
            .file
            .lock()
            .map_err(|_| StoreError::Internal("log mutex poisoned".into()))?;
        file.sync_all()?;
        Ok(())
    }

    /// Drops every frame, leaving only the header. Called after a full
    /// flush has made all logged mutations durable in runs.
    pub fn truncate(&self) -> Result<(), StoreError> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| StoreError::Internal("log mutex poisoned".into()))?;
        file.set_len(WAL_HEADER_SIZE)?;
        file.seek(SeekFrom::End(0))?;
        file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode_op(buf: &mut Vec<u8>, wal_op: &WalOp) {
        match &wal_op.op {
            WriteOp::Put { ns, key, value } => {
                buf.push(OP_PUT);
                codec::put_u64(buf, wal_op.seq);
                codec::put_bytes(buf, ns.as_bytes());
                codec::put_bytes(buf, key);
                codec::put_bytes(buf, value);
            }
            // Single deletes share the tombstone representation; the
            // distinction only matters to stores with a dedicated path.
            WriteOp::Delete { ns, key } | WriteOp::SingleDelete { ns, key } => {
                buf.push(OP_DELETE);
                codec::put_u64(buf, wal_op.seq);
                codec::put_bytes(buf, ns.as_bytes());
                codec::put_bytes(buf, key);
            }
            WriteOp::DeleteRange { ns, start, end } => {
                buf.push(OP_DELETE_RANGE);
                codec::put_u64(buf, wal_op.seq);
                codec::put_bytes(buf, ns.as_bytes());
                codec::put_bytes(buf, start);
                codec::put_bytes(buf, end);
            }
        }
    }

    /// Reads one frame. `Ok(None)` on clean EOF; `Err` on a corrupt or
    /// truncated frame.
    fn read_frame(reader: &mut Reader<'_>) -> Result<Option<Vec<WalOp>>, StoreError> {
        if reader.remaining() == 0 {
            return Ok(None);
        }

        let payload = reader.bytes()?;
        let stored_crc = reader.u32()?;

        let mut hasher = Crc32::new();
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(StoreError::Corruption("frame checksum mismatch".into()));
        }

        let mut body = Reader::new(payload);
        let count = body.u32()?;
        let mut ops = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ops.push(Self::decode_op(&mut body)?);
        }
        Ok(Some(ops))
    }

    fn decode_op(body: &mut Reader<'_>) -> Result<WalOp, StoreError> {
        let tag = body.u8()?;
        let seq = body.u64()?;
        let ns = String::from_utf8(body.bytes()?.to_vec())
            .map_err(|_| StoreError::Corruption("namespace is not valid UTF-8".into()))?;
        let op = match tag {
            OP_PUT => {
                let key = body.bytes()?.to_vec();
                let value = body.bytes()?.to_vec();
                WriteOp::Put { ns, key, value }
            }
            OP_DELETE => {
                let key = body.bytes()?.to_vec();
                WriteOp::Delete { ns, key }
            }
            OP_DELETE_RANGE => {
                let start = body.bytes()?.to_vec();
                let end = body.bytes()?.to_vec();
                WriteOp::DeleteRange { ns, start, end }
            }
            other => {
                return Err(StoreError::Corruption(format!("unknown op tag {other}")));
            }
        };
        Ok(WalOp { seq, op })
    }
}
