//! Bucket file format.
//!
//! Every bucket file in a base or delta directory is an event file: a short
//! header followed by checksummed records.
//!
//! ## File Format
//!
//! ```text
//! [magic: 8 bytes "ACIDEVT1"]
//! [kind: u8]                 0 = ACID events, 1 = original rows
//! [Record 1]
//! ...
//! [Record N]
//! ```
//!
//! ## Record Format
//!
//! ```text
//! [checksum: u32][length: u32][payload: length bytes]
//! ```
//!
//! ## Event Payload
//!
//! ```text
//! [operation: u8][original_write_id: u64][bucket: u32][row_id: u64]
//! [current_write_id: u64][statement_id: u32][row: remaining bytes]
//! ```
//!
//! Original-row payloads are the row bytes alone; their identity is
//! derived from the bucket and the row's ordinal when read.
//!
//! All integers are little-endian. Events in an ACID file are sorted by
//! [`EventKey`](crate::types::EventKey).

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::EventFileReader;
pub use record::Record;
pub use writer::EventFileWriter;

use crate::error::{Error, Result};
use crate::types::{AcidEvent, Operation, RecordIdentifier};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes at the start of every bucket file.
pub const MAGIC: &[u8; 8] = b"ACIDEVT1";

/// Size of the file header (magic + kind).
pub const FILE_HEADER_SIZE: usize = 9;

/// Fixed part of an event payload.
pub const EVENT_HEADER_SIZE: usize = 33;

/// What the records of a bucket file contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileKind {
    /// ACID events with explicit identity.
    Acid = 0,
    /// Plain rows from a legacy layout.
    Original = 1,
}

impl FileKind {
    /// Converts from u8.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FileKind::Acid),
            1 => Ok(FileKind::Original),
            _ => Err(Error::corruption(format!("Invalid bucket file kind: {}", value))),
        }
    }
}

/// Encodes an event payload.
pub fn encode_event(event: &AcidEvent) -> Bytes {
    let mut buf = BytesMut::with_capacity(EVENT_HEADER_SIZE + event.row.len());
    buf.put_u8(event.operation.as_u8());
    buf.put_u64_le(event.id.original_write_id);
    buf.put_u32_le(event.id.bucket);
    buf.put_u64_le(event.id.row_id);
    buf.put_u64_le(event.current_write_id);
    buf.put_u32_le(event.statement_id);
    buf.put_slice(&event.row);
    buf.freeze()
}

/// Decodes an event payload.
pub fn decode_event(mut payload: Bytes) -> Result<AcidEvent> {
    if payload.len() < EVENT_HEADER_SIZE {
        return Err(Error::corruption(format!("Event too short: {} bytes", payload.len())));
    }
    let op = payload.get_u8();
    let operation =
        Operation::from_u8(op).ok_or_else(|| Error::corruption(format!("Invalid operation: {}", op)))?;
    let original_write_id = payload.get_u64_le();
    let bucket = payload.get_u32_le();
    let row_id = payload.get_u64_le();
    let current_write_id = payload.get_u64_le();
    let statement_id = payload.get_u32_le();

    Ok(AcidEvent {
        operation,
        id: RecordIdentifier::new(original_write_id, bucket, row_id),
        current_write_id,
        statement_id,
        row: payload,
    })
}
