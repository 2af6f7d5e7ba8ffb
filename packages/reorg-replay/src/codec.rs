//! Binary record of one captured change.
//!
//! Record layout (all integers little-endian):
//!
//! ```text
//! | u32 total length | u8 kind tag | u32 crc32 of payload | payload (row image) |
//! ```
//!
//! Records live only in the change buffer and its spill file; the layout is
//! private working state, not a durable format.

use std::fmt;

use crc32fast::Hasher;
use reorg_core::Row;

use crate::error::ReplayError;
use crate::stream::SourceRow;

/// Bytes preceding the payload.
pub const HEADER_LEN: usize = 4 + 1 + 4;

/// Kind of a captured change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    /// Row image before an update; only present when the identity key changed.
    UpdateOld,
    UpdateNew,
    Delete,
}

impl ChangeKind {
    /// One-byte wire tag.
    pub fn tag(self) -> u8 {
        match self {
            ChangeKind::Insert => 0,
            ChangeKind::UpdateOld => 1,
            ChangeKind::UpdateNew => 2,
            ChangeKind::Delete => 3,
        }
    }

    /// Parses a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self, ReplayError> {
        match tag {
            0 => Ok(ChangeKind::Insert),
            1 => Ok(ChangeKind::UpdateOld),
            2 => Ok(ChangeKind::UpdateNew),
            3 => Ok(ChangeKind::Delete),
            other => Err(ReplayError::UnrecognizedChangeKind(other)),
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Insert => "insert",
            ChangeKind::UpdateOld => "update (old row)",
            ChangeKind::UpdateNew => "update",
            ChangeKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A decoded change: kind plus an aligned copy of the row image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    kind: ChangeKind,
    row: Row,
    size: usize,
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    /// Size of the encoded record this event was decoded from.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn into_row(self) -> Row {
        self.row
    }
}

/// Encodes a change whose row image may reference externally stored values.
///
/// External values are copied into their field range so the record is
/// self-contained: the source's chunk memory is only valid until its next
/// read.
pub fn encode(kind: ChangeKind, row: &SourceRow<'_>) -> Result<Vec<u8>, ReplayError> {
    let image = row.image();
    let mut record = start_record(kind, image.len())?;
    let payload_start = record.len();
    record.extend_from_slice(image);

    for value in row.external() {
        let end = value
            .offset()
            .checked_add(value.len())
            .filter(|end| *end <= image.len())
            .ok_or_else(|| ReplayError::CorruptRecord {
                reason: format!(
                    "external value at offset {} (len {}) outside row of {} bytes",
                    value.offset(),
                    value.len(),
                    image.len()
                ),
            })?;
        let stored = value.stored_len();
        if stored > value.len() {
            return Err(ReplayError::CorruptRecord {
                reason: format!(
                    "external value of {} bytes does not fit field of {} bytes at offset {}",
                    stored,
                    value.len(),
                    value.offset()
                ),
            });
        }

        let field = &mut record[payload_start + value.offset()..payload_start + end];
        let mut written = 0;
        for chunk in value.chunks() {
            field[written..written + chunk.len()].copy_from_slice(chunk);
            written += chunk.len();
        }
        field[written..].fill(0);
    }

    finish_record(&mut record);
    Ok(record)
}

/// Encodes a change from an already self-contained row image.
pub fn encode_image(kind: ChangeKind, image: &[u8]) -> Result<Vec<u8>, ReplayError> {
    let mut record = start_record(kind, image.len())?;
    record.extend_from_slice(image);
    finish_record(&mut record);
    Ok(record)
}

/// Reads the total record length from a record header.
pub fn record_len(header: &[u8]) -> Result<usize, ReplayError> {
    let bytes: [u8; 4] = header
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| ReplayError::CorruptRecord {
            reason: format!("record of {} bytes is shorter than its header", header.len()),
        })?;
    let len = u32::from_le_bytes(bytes) as usize;
    if len < HEADER_LEN {
        return Err(ReplayError::CorruptRecord {
            reason: format!("declared length {} is shorter than the header", len),
        });
    }
    Ok(len)
}

/// Decodes one record.
///
/// The payload is copied into fresh 8-byte aligned storage; `bytes` may
/// start at any address.
pub fn decode(bytes: &[u8]) -> Result<ChangeEvent, ReplayError> {
    if bytes.len() < HEADER_LEN {
        return Err(ReplayError::CorruptRecord {
            reason: format!("record of {} bytes is shorter than its header", bytes.len()),
        });
    }
    let len = record_len(bytes)?;
    if len != bytes.len() {
        return Err(ReplayError::CorruptRecord {
            reason: format!("header declares {} bytes but {} are present", len, bytes.len()),
        });
    }

    let kind = ChangeKind::from_tag(bytes[4])?;
    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&bytes[5..HEADER_LEN]);
    let expected = u32::from_le_bytes(checksum);

    let payload = &bytes[HEADER_LEN..];
    let mut hasher = Hasher::new();
    hasher.update(payload);
    let actual = hasher.finalize();
    if actual != expected {
        return Err(ReplayError::CorruptRecord {
            reason: format!(
                "checksum mismatch: expected {:08x}, got {:08x}",
                expected, actual
            ),
        });
    }

    Ok(ChangeEvent {
        kind,
        row: Row::from_unaligned(payload),
        size: len,
    })
}

fn start_record(kind: ChangeKind, payload_len: usize) -> Result<Vec<u8>, ReplayError> {
    let total = payload_len
        .checked_add(HEADER_LEN)
        .filter(|total| *total <= u32::MAX as usize)
        .ok_or_else(|| ReplayError::CorruptRecord {
            reason: format!("row image of {} bytes does not fit a record", payload_len),
        })?;
    let mut record = Vec::with_capacity(total);
    record.extend_from_slice(&(total as u32).to_le_bytes());
    record.push(kind.tag());
    record.extend_from_slice(&[0u8; 4]);
    Ok(record)
}

fn finish_record(record: &mut [u8]) {
    let mut hasher = Hasher::new();
    hasher.update(&record[HEADER_LEN..]);
    let checksum = hasher.finalize();
    record[5..HEADER_LEN].copy_from_slice(&checksum.to_le_bytes());
}
