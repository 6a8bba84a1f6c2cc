//! Pluggable item encoding for sketches over generic item types
//!
//! The frequent-items wire format stores items in whatever encoding the
//! caller chooses. An [`ItemSerde`] bundles that choice: a one-byte type
//! identifier written into the preamble plus the encode/decode pair. A
//! reader must present the same serde it wrote with; the type byte is
//! validated on deserialization.

use crate::codec::Reader;
use crate::common::{Result, SketchError};

/// Capability bundle encoding and decoding items of type `T`
pub trait ItemSerde<T> {
    /// Identifier byte recorded in serialized preambles
    fn type_id(&self) -> u8;

    /// Append the encoding of `item` to `out`
    fn serialize_item(&self, item: &T, out: &mut Vec<u8>);

    /// Decode one item from the reader
    ///
    /// # Errors
    /// Returns `SketchError::DeserializationError` when the stream is
    /// truncated or the encoding is invalid
    fn deserialize_item(&self, reader: &mut Reader<'_>) -> Result<T>;
}

/// Fixed-width little-endian encoding for `u64` items
#[derive(Debug, Clone, Copy, Default)]
pub struct U64Serde;

impl ItemSerde<u64> for U64Serde {
    fn type_id(&self) -> u8 {
        1
    }

    fn serialize_item(&self, item: &u64, out: &mut Vec<u8>) {
        out.extend_from_slice(&item.to_le_bytes());
    }

    fn deserialize_item(&self, reader: &mut Reader<'_>) -> Result<u64> {
        reader.read_u64()
    }
}

/// Length-prefixed UTF-8 encoding for `String` items
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerde;

impl ItemSerde<String> for StringSerde {
    fn type_id(&self) -> u8 {
        2
    }

    fn serialize_item(&self, item: &String, out: &mut Vec<u8>) {
        out.extend_from_slice(&(item.len() as u32).to_le_bytes());
        out.extend_from_slice(item.as_bytes());
    }

    fn deserialize_item(&self, reader: &mut Reader<'_>) -> Result<String> {
        let len = reader.read_u32()? as usize;
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SketchError::DeserializationError(format!("invalid UTF-8 item: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_round_trip() {
        let serde = U64Serde;
        let mut out = Vec::new();
        serde.serialize_item(&0xDEAD_BEEFu64, &mut out);
        assert_eq!(out.len(), 8);

        let mut reader = Reader::new(&out);
        assert_eq!(serde.deserialize_item(&mut reader).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_string_round_trip() {
        let serde = StringSerde;
        let mut out = Vec::new();
        serde.serialize_item(&"heavy hitter".to_string(), &mut out);

        let mut reader = Reader::new(&out);
        assert_eq!(serde.deserialize_item(&mut reader).unwrap(), "heavy hitter");
    }

    #[test]
    fn test_string_truncated() {
        let serde = StringSerde;
        let mut out = Vec::new();
        serde.serialize_item(&"truncate me".to_string(), &mut out);
        out.truncate(out.len() - 2);

        let mut reader = Reader::new(&out);
        assert!(serde.deserialize_item(&mut reader).is_err());
    }
}
