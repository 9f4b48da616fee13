//! Wire encoding.

/// An append-only buffer for building wire messages.
///
/// All multi-byte integers are unsigned LEB128 varints. Byte strings and
/// UTF-8 strings are written with a varint length prefix. Fixed-width
/// fields (hashes, signatures) are written raw with [`WireWriter::put_fixed`]
/// and must be read back with the matching width.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Writes a single byte.
    pub fn put_u8(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Writes an unsigned LEB128 varint.
    pub fn put_varint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    /// Writes a length-prefixed byte string.
    pub fn put_bytes(&mut self, data: &[u8]) {
        self.put_varint(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, text: &str) {
        self.put_bytes(text.as_bytes());
    }

    /// Writes raw bytes without a length prefix.
    ///
    /// The reader must know the width out of band.
    pub fn put_fixed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer, returning the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
