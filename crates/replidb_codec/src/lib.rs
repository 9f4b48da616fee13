//! # RepliDB Codec
//!
//! Varint and length-prefixed wire encoding for RepliDB.
//!
//! All RepliDB wire structures are built from four primitives:
//! - unsigned LEB128 varints
//! - single bytes (tags, kind codes)
//! - length-prefixed byte strings (varint length, then raw bytes)
//! - length-prefixed UTF-8 strings
//!
//! Encoding is deterministic: identical inputs produce identical bytes,
//! which the merge layer relies on for record identity.
//!
//! ## Usage
//!
//! ```
//! use replidb_codec::{WireReader, WireWriter};
//!
//! let mut w = WireWriter::new();
//! w.put_varint(300);
//! w.put_str("notes");
//! let bytes = w.into_bytes();
//!
//! let mut r = WireReader::new(&bytes);
//! assert_eq!(r.take_varint().unwrap(), 300);
//! assert_eq!(r.take_str().unwrap(), "notes");
//! assert!(r.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;

pub use decoder::WireReader;
pub use encoder::WireWriter;
pub use error::{CodecError, CodecResult};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn roundtrip_mixed() {
        let mut w = WireWriter::new();
        w.put_u8(4);
        w.put_varint(u64::MAX);
        w.put_bytes(&[0xde, 0xad, 0xbe, 0xef]);
        w.put_str("owner/collection");
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.take_u8().unwrap(), 4);
        assert_eq!(r.take_varint().unwrap(), u64::MAX);
        assert_eq!(r.take_bytes().unwrap(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(r.take_str().unwrap(), "owner/collection");
        assert!(r.expect_end().is_ok());
    }

    proptest! {
        #[test]
        fn varint_roundtrip(value in any::<u64>()) {
            let mut w = WireWriter::new();
            w.put_varint(value);
            let bytes = w.into_bytes();
            let mut r = WireReader::new(&bytes);
            prop_assert_eq!(r.take_varint().unwrap(), value);
            prop_assert!(r.is_empty());
        }

        #[test]
        fn bytes_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut w = WireWriter::new();
            w.put_bytes(&data);
            let bytes = w.into_bytes();
            let mut r = WireReader::new(&bytes);
            prop_assert_eq!(r.take_bytes().unwrap(), data.as_slice());
        }

        #[test]
        fn varint_encoding_is_minimal(value in any::<u64>()) {
            let mut w = WireWriter::new();
            w.put_varint(value);
            let bytes = w.into_bytes();
            // Last byte never has the continuation bit; no redundant
            // trailing zero groups.
            prop_assert!(bytes.last().unwrap() & 0x80 == 0);
            if bytes.len() > 1 {
                prop_assert!(*bytes.last().unwrap() != 0);
            }
        }
    }
}
