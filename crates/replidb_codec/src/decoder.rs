//! Wire decoding.

use crate::error::{CodecError, CodecResult};

/// A bounds-checked cursor over an encoded wire message.
///
/// Every read either consumes exactly the bytes of one field or fails
/// without advancing past the end of the input. Decoders for complete
/// messages should finish with [`WireReader::expect_end`] so that
/// trailing garbage is treated as a protocol violation.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader over the given input.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns true if all input has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Reads a single byte.
    pub fn take_u8(&mut self) -> CodecResult<u8> {
        if self.is_empty() {
            return Err(CodecError::UnexpectedEnd {
                needed: 1,
                remaining: 0,
            });
        }
        let byte = self.buf[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Reads an unsigned LEB128 varint.
    pub fn take_varint(&mut self) -> CodecResult<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.take_u8()?;
            if shift == 63 && byte > 1 {
                return Err(CodecError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(CodecError::VarintOverflow);
            }
        }
    }

    /// Reads a length-prefixed byte string.
    pub fn take_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.take_varint()?;
        if len > self.remaining() as u64 {
            return Err(CodecError::LengthOutOfBounds {
                declared: len,
                remaining: self.remaining(),
            });
        }
        let len = len as usize;
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn take_str(&mut self) -> CodecResult<&'a str> {
        let bytes = self.take_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads exactly `len` raw bytes (no length prefix).
    pub fn take_fixed(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(CodecError::UnexpectedEnd {
                needed: len - self.remaining(),
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Fails if any input remains unread.
    pub fn expect_end(&self) -> CodecResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                count: self.remaining(),
            })
        }
    }
}
