// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Canonical wire encoding. Every hashed or signed structure in the directory
//! is encoded with fixed field order, big-endian integers and u64
//! length-prefixed variable fields, so that two encodings of the same logical
//! value are byte-identical. Hashes are computed over these bytes only; serde
//! never touches signed material.

/// An error produced while decoding canonical bytes
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum WireError {
    /// The buffer ended before the announced field did
    Truncated,
    /// The buffer contained bytes past the end of the outermost field
    TrailingBytes(usize),
    /// A length prefix exceeded the bound the caller imposed
    FieldTooLong(u64),
}

impl core::fmt::Display for WireError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WireError::Truncated => write!(f, "MALFORMED: input truncated"),
            WireError::TrailingBytes(count) => {
                write!(f, "MALFORMED: {count} trailing bytes after decode")
            }
            WireError::FieldTooLong(len) => {
                write!(f, "MALFORMED: field length {len} exceeds bound")
            }
        }
    }
}

/// Corresponds to the I2OSP() function from RFC 8017, prepending the length of
/// a byte array to the byte array (so that it is ready for hashing)
///
/// Input byte array cannot be > 2^64-1 in length
pub fn i2osp_array(input: &[u8]) -> Vec<u8> {
    [&(input.len() as u64).to_be_bytes(), input].concat()
}

/// Append a u64 length-prefixed byte field
pub fn put_bytes(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u64).to_be_bytes());
    out.extend_from_slice(field);
}

/// Append a big-endian u64
pub fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// A cursor over canonical bytes. Decoding is strict: the caller finishes
/// with [Reader::finish], which rejects trailing input.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Begin reading `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Read exactly `n` raw bytes
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() - self.pos < n {
            return Err(WireError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a fixed 32-byte field
    pub fn take_digest(&mut self) -> Result<[u8; 32], WireError> {
        let raw = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(raw);
        Ok(out)
    }

    /// Read a big-endian u64
    pub fn take_u64(&mut self) -> Result<u64, WireError> {
        let raw = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(raw);
        Ok(u64::from_be_bytes(out))
    }

    /// Read a u64 length-prefixed byte field, bounding the announced length
    /// before allocating
    pub fn take_bytes(&mut self, max_len: usize) -> Result<Vec<u8>, WireError> {
        let len = self.take_u64()?;
        if len > max_len as u64 {
            return Err(WireError::FieldTooLong(len));
        }
        Ok(self.take(len as usize)?.to_vec())
    }

    /// Assert that the input was consumed exactly
    pub fn finish(self) -> Result<(), WireError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes(self.buf.len() - self.pos))
        }
    }
}
