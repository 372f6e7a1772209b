//! Minimal little-endian codec shared by the WAL and run file formats.
//!
//! Hand-written so the on-disk representation never changes under a
//! dependency upgrade. All lengths are `u32`, all multi-byte integers are
//! little-endian, and every variable-length field is length-prefixed.

use super::super::StoreError;

/// Upper bound for any single length-prefixed field (256 MiB). Guards
/// decoders against corrupt length prefixes.
pub(crate) const MAX_FIELD_LEN: u32 = 256 * 1024 * 1024;

pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

/// A bounds-checked sequential reader over a byte slice.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StoreError> {
        if self.remaining() < n {
            return Err(StoreError::Corruption("unexpected end of buffer".into()));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), StoreError> {
        self.take(n)?;
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, StoreError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, StoreError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, StoreError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn bytes(&mut self) -> Result<&'a [u8], StoreError> {
        let len = self.u32()?;
        if len > MAX_FIELD_LEN {
            return Err(StoreError::Corruption(format!(
                "field length {len} exceeds limit"
            )));
        }
        self.take(len as usize)
    }
}
