//! Bucket file reader.
//!
//! Reads records sequentially from any byte stream handed out by a storage
//! backend.

use super::record::{Record, HEADER_SIZE};
use super::{decode_event, FileKind, FILE_HEADER_SIZE, MAGIC};
use crate::error::{Error, Result};
use crate::types::AcidEvent;
use bytes::Bytes;
use std::io::{ErrorKind, Read};

/// Sequential reader over one bucket file.
pub struct EventFileReader<R: Read> {
    reader: R,
    kind: FileKind,
    verify_checksums: bool,
    /// Current read position
    position: u64,
}

impl<R: Read> EventFileReader<R> {
    /// Read the file header and position at the first record.
    pub fn new(mut reader: R, verify_checksums: bool) -> Result<Self> {
        let mut header = [0u8; FILE_HEADER_SIZE];
        let read = read_fully(&mut reader, &mut header)?;
        if read < FILE_HEADER_SIZE {
            return Err(Error::corruption(format!("Bucket file header truncated at {} bytes", read)));
        }
        if &header[..8] != MAGIC {
            return Err(Error::corruption("Invalid bucket file magic"));
        }
        let kind = FileKind::from_u8(header[8])?;

        Ok(Self { reader, kind, verify_checksums, position: FILE_HEADER_SIZE as u64 })
    }

    /// What the records of this file contain.
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Current read position
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next record payload. Returns None at end of file.
    pub fn read_record(&mut self) -> Result<Option<Bytes>> {
        let mut header = [0u8; HEADER_SIZE];
        let read = read_fully(&mut self.reader, &mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_SIZE {
            return Err(Error::corruption(format!(
                "Truncated record header at offset {}",
                self.position
            )));
        }

        let (checksum, length) = Record::decode_header(&header)?;
        let mut payload = vec![0u8; length];
        if read_fully(&mut self.reader, &mut payload)? < length {
            return Err(Error::corruption(format!(
                "Incomplete record at offset {}: expected {} bytes",
                self.position, length
            )));
        }
        if self.verify_checksums {
            Record::verify(checksum, &payload)?;
        }

        self.position += (HEADER_SIZE + length) as u64;
        Ok(Some(Bytes::from(payload)))
    }

    /// Read the next event of an ACID file.
    pub fn read_event(&mut self) -> Result<Option<AcidEvent>> {
        if self.kind != FileKind::Acid {
            return Err(Error::invalid_state("original-row file holds no events"));
        }
        match self.read_record()? {
            Some(payload) => decode_event(payload).map(Some),
            None => Ok(None),
        }
    }

    /// Read every remaining event.
    pub fn read_all_events(&mut self) -> Result<Vec<AcidEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.read_event()? {
            events.push(event);
        }
        Ok(events)
    }
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}
