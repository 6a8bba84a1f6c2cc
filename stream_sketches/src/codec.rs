//! Preamble codec shared by the serialized sketch formats
//!
//! Every sketch family writes the same 8-byte header shape: preamble
//! length in longs, serialization version, family id, two family-specific
//! bytes, flags, a serializer type byte, and a reserved byte. A reader can
//! always obtain the preamble length from byte 0 alone and validate the
//! rest before parsing the payload. All multi-byte integers are
//! little-endian on the wire.

use crate::common::{Result, SketchError};

/// Serialization version written by this crate
pub const SER_VER: u8 = 1;

/// Flags bit 2: the sketch is empty
pub const FLAG_EMPTY: u8 = 0x04;

/// Flags bit 3: high-rank-accuracy orientation (relative-error quantiles)
pub const FLAG_HRA: u8 = 0x08;

/// Sketch family identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Family {
    /// HLL cardinality family
    Hll = 7,
    /// Compact-levels quantiles family
    Quantiles = 8,
    /// Frequent-items family
    Frequency = 10,
    /// Relative-error quantiles family
    RelativeError = 17,
}

impl Family {
    /// The on-wire identifier byte
    pub fn id(self) -> u8 {
        self as u8
    }
}

/// The fixed 8-byte header at the front of every serialized sketch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    /// Number of 8-byte preamble longs (byte 0)
    pub pre_longs: u8,
    /// Serialization version (byte 1)
    pub ser_ver: u8,
    /// Family id (byte 2)
    pub family: u8,
    /// Family-specific byte 3
    pub byte3: u8,
    /// Family-specific byte 4
    pub byte4: u8,
    /// Flags (byte 5)
    pub flags: u8,
    /// Serializer type byte (byte 6); zero when unused
    pub type_byte: u8,
    /// Reserved (byte 7)
    pub byte7: u8,
}

impl Preamble {
    /// Append the 8 header bytes to `out`
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            self.pre_longs,
            self.ser_ver,
            self.family,
            self.byte3,
            self.byte4,
            self.flags,
            self.type_byte,
            self.byte7,
        ]);
    }

    /// Parse the 8 header bytes from the front of `bytes`
    ///
    /// # Errors
    /// Returns `SketchError::DeserializationError` when fewer than 8 bytes
    /// are available
    pub fn read(bytes: &[u8]) -> Result<Self> {
        crate::common::validation::validate_min_size(bytes.len(), 8)?;
        Ok(Preamble {
            pre_longs: bytes[0],
            ser_ver: bytes[1],
            family: bytes[2],
            byte3: bytes[3],
            byte4: bytes[4],
            flags: bytes[5],
            type_byte: bytes[6],
            byte7: bytes[7],
        })
    }

    /// Whether the EMPTY flag is set
    pub fn is_empty(&self) -> bool {
        self.flags & FLAG_EMPTY != 0
    }

    /// Validate the serialization version and family id
    pub fn check_family(&self, expected: Family) -> Result<()> {
        if self.ser_ver != SER_VER {
            return Err(SketchError::DeserializationError(format!(
                "Unsupported serialization version {}, expected {}",
                self.ser_ver, SER_VER
            )));
        }
        if self.family != expected.id() {
            return Err(SketchError::DeserializationError(format!(
                "Family id mismatch: got {}, expected {}",
                self.family,
                expected.id()
            )));
        }
        Ok(())
    }

    /// Validate that the EMPTY flag agrees with the preamble length
    ///
    /// `empty_pre_longs` is the preamble length an empty sketch of this
    /// family writes.
    pub fn check_empty_flag(&self, empty_pre_longs: u8) -> Result<()> {
        if self.is_empty() != (self.pre_longs == empty_pre_longs) {
            return Err(SketchError::DeserializationError(format!(
                "EMPTY flag ({}) disagrees with preamble length {}",
                self.is_empty(),
                self.pre_longs
            )));
        }
        Ok(())
    }
}

/// Bounds-checked little-endian reader over a serialized payload
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Wrap a byte slice, starting at offset 0
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    /// Wrap a byte slice, starting at `pos`
    pub fn with_offset(buf: &'a [u8], pos: usize) -> Self {
        Reader { buf, pos }
    }

    /// Current read offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(SketchError::DeserializationError(format!(
                "Truncated input: need {} bytes at offset {}, {} remain",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a little-endian u16
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian u32
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian u64
    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a little-endian i64
    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Read a little-endian f64
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }
}
