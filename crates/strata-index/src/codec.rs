use std::fmt;
use std::path::Path;

use crate::error::{IndexError, IndexResult};

/// Value format of a [`Bucket`](crate::Bucket).
///
/// The bucket owns the file framing (version byte, entry count, path keys);
/// the codec reads and writes one entry value at a time.
pub trait BucketCodec {
    /// In-memory value stored per path.
    type Value: Clone + fmt::Debug;

    /// Format version written as the first byte of every bucket file.
    const VERSION: u8;

    /// Name of the bucket file inside its directory.
    const FILE_NAME: &'static str = "bucket.index";

    /// Decode one value.
    fn read_value(&self, reader: &mut ByteReader<'_>) -> IndexResult<Self::Value>;

    /// Encode one value.
    fn write_value(&self, value: &Self::Value, out: &mut Vec<u8>);

    /// Normalize a value written back by a visitor.
    ///
    /// Returning `None` removes the entry altogether.
    fn compact(&self, value: Self::Value) -> Option<Self::Value> {
        Some(value)
    }
}

/// Big-endian cursor over a bucket file's bytes.
///
/// Every read is bounds-checked; running past the end yields
/// [`IndexError::Corrupt`] naming the file.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    source: &'a Path,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], source: &'a Path) -> Self {
        Self {
            data,
            pos: 0,
            source,
        }
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> IndexResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(self.corrupt(format!(
                "truncated at offset {}: needed {len} bytes, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> IndexResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> IndexResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> IndexResult<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> IndexResult<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> IndexResult<i64> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// A length-prefixed (`u16`) UTF-8 string.
    pub fn read_utf(&mut self) -> IndexResult<&'a str> {
        let len = self.read_u16()? as usize;
        let offset = self.pos;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map_err(|_| self.corrupt(format!("invalid UTF-8 in key at offset {offset}")))
    }

    /// Error describing corruption at the current file.
    pub fn corrupt(&self, reason: impl Into<String>) -> IndexError {
        IndexError::Corrupt {
            path: self.source.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Append a length-prefixed (`u16`) UTF-8 string.
///
/// Keys longer than `u16::MAX` bytes are rejected by the caller before
/// they reach the writer.
pub fn write_utf(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}
