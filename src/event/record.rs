//! Record framing for bucket files.
//!
//! Each record consists of:
//! - Checksum (4 bytes): CRC32 of the payload
//! - Length (4 bytes): Length of the payload
//! - Payload (variable)

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc32fast::Hasher;

/// Maximum size of a single record's payload
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024; // 64MB

/// Size of the record header (checksum + length)
pub const HEADER_SIZE: usize = 8;

/// A framed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Payload bytes
    pub payload: Bytes,
}

impl Record {
    /// Create a new record
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into() }
    }

    /// Encode the record into bytes
    ///
    /// Format: [checksum: u32][length: u32][payload: bytes]
    pub fn encode(&self) -> Result<Bytes> {
        if self.payload.len() > MAX_RECORD_SIZE {
            return Err(Error::invalid_argument(format!(
                "Record of {} bytes exceeds maximum of {}",
                self.payload.len(),
                MAX_RECORD_SIZE
            )));
        }
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32_le(Self::calculate_checksum(&self.payload));
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Parse a record header, returning (checksum, length)
    pub fn decode_header(mut header: &[u8]) -> Result<(u32, usize)> {
        if header.len() < HEADER_SIZE {
            return Err(Error::corruption(format!("Record header too short: {} bytes", header.len())));
        }
        let checksum = header.get_u32_le();
        let length = header.get_u32_le() as usize;
        if length > MAX_RECORD_SIZE {
            return Err(Error::corruption(format!("Record length {} exceeds maximum", length)));
        }
        Ok((checksum, length))
    }

    /// Verify a payload against its stored checksum
    pub fn verify(expected: u32, payload: &[u8]) -> Result<()> {
        let actual = Self::calculate_checksum(payload);
        if actual != expected {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }

    /// Calculate CRC32 checksum of a payload
    fn calculate_checksum(payload: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(payload);
        hasher.finalize()
    }

    /// Get the total size of the encoded record
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
