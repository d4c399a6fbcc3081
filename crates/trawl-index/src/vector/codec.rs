//! Little-endian byte layout shared by the vector index snapshots.
//!
//! Every blob is `magic (8 bytes) | version (u32) | body | sha256(magic..body)`.
//! Readers verify length, magic, version and checksum up front, so any
//! truncation or bit flip surfaces as [`TrawlError::CorruptIndex`] before a
//! single field is decoded.

use sha2::{Digest, Sha256};
use trawl_core::TrawlError;

const CHECKSUM_LEN: usize = 32;

pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn new(magic: &[u8; 8], version: u32) -> Self {
        let mut writer = Self {
            buf: Vec::with_capacity(1024),
        };
        writer.buf.extend_from_slice(magic);
        writer.put_u32(version);
        writer
    }

    pub(crate) fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn put_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub(crate) fn put_len(&mut self, value: usize) {
        // Lengths above u32::MAX are not representable in the format.
        self.put_u32(u32::try_from(value).unwrap_or(u32::MAX));
    }

    pub(crate) fn put_f32s(&mut self, values: &[f32]) {
        for value in values {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        let digest = Sha256::digest(&self.buf);
        self.buf.extend_from_slice(&digest);
        self.buf
    }
}

pub(crate) struct ByteReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Validate framing and return a reader positioned after the version.
    pub(crate) fn open(bytes: &'a [u8], magic: &[u8; 8], version: u32) -> Result<Self, TrawlError> {
        if bytes.len() < magic.len() + 4 + CHECKSUM_LEN {
            return Err(TrawlError::CorruptIndex(format!(
                "snapshot too short ({} bytes)",
                bytes.len()
            )));
        }
        let (payload, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if &payload[..magic.len()] != magic {
            return Err(TrawlError::CorruptIndex("bad magic".into()));
        }
        if Sha256::digest(payload).as_slice() != checksum {
            return Err(TrawlError::CorruptIndex("checksum mismatch".into()));
        }

        let mut reader = Self {
            body: payload,
            pos: magic.len(),
        };
        let found = reader.u32()?;
        if found != version {
            return Err(TrawlError::CorruptIndex(format!(
                "unsupported format version {found} (expected {version})"
            )));
        }
        Ok(reader)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TrawlError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.body.len())
            .ok_or_else(|| TrawlError::CorruptIndex(format!("truncated at byte {}", self.pos)))?;
        let slice = &self.body[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, TrawlError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32, TrawlError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, TrawlError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn len(&mut self) -> Result<usize, TrawlError> {
        Ok(self.u32()? as usize)
    }

    pub(crate) fn f32s(&mut self, count: usize) -> Result<Vec<f32>, TrawlError> {
        let bytes = self.take(count.checked_mul(4).ok_or_else(|| {
            TrawlError::CorruptIndex("vector length overflow".into())
        })?)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Fail unless every body byte was consumed.
    pub(crate) fn finish(self) -> Result<(), TrawlError> {
        if self.pos == self.body.len() {
            Ok(())
        } else {
            Err(TrawlError::CorruptIndex(format!(
                "{} trailing bytes",
                self.body.len() - self.pos
            )))
        }
    }
}
