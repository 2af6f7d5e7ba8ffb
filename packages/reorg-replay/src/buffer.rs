//! Ordered holding area for encoded changes.
//!
//! Records are kept back to back in a resident byte buffer. When the
//! resident bytes exceed the spill threshold everything moves to an
//! anonymous temporary file and later records are appended there.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use crate::codec::{self, ChangeEvent, HEADER_LEN};
use crate::error::ReplayError;

/// Commit-ordered buffer of encoded change records.
#[derive(Debug)]
pub struct ChangeBuffer {
    resident: Vec<u8>,
    spill: Option<File>,
    spill_threshold: usize,
    count: usize,
    data_size: usize,
}

impl ChangeBuffer {
    /// Creates an empty buffer that spills once resident bytes exceed `spill_threshold`.
    pub fn new(spill_threshold: usize) -> Self {
        Self {
            resident: Vec::new(),
            spill: None,
            spill_threshold,
            count: 0,
            data_size: 0,
        }
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Aggregate size of the buffered records in bytes.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Returns whether records currently live in the spill file.
    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    /// Appends one encoded record.
    pub fn append(&mut self, record: &[u8]) -> Result<(), ReplayError> {
        match self.spill.as_mut() {
            Some(file) => file.write_all(record)?,
            None => {
                self.resident.extend_from_slice(record);
                if self.resident.len() > self.spill_threshold {
                    self.spill_to_file()?;
                }
            }
        }
        self.count += 1;
        self.data_size += record.len();
        Ok(())
    }

    fn spill_to_file(&mut self) -> Result<(), ReplayError> {
        let mut file = tempfile::tempfile()?;
        file.write_all(&self.resident)?;
        tracing::debug!(
            "Change buffer spilled {} records ({} bytes) to a temporary file",
            self.count + 1,
            self.resident.len()
        );
        self.resident = Vec::new();
        self.spill = Some(file);
        Ok(())
    }

    /// Consumes the buffered records in order.
    ///
    /// Each yielded event is removed from the buffer. Dropping the drain
    /// before it is exhausted discards the remaining records.
    pub fn drain(&mut self) -> Result<Drain<'_>, ReplayError> {
        let spilled = match self.spill.take() {
            Some(mut file) => {
                file.flush()?;
                file.seek(SeekFrom::Start(0))?;
                Some(BufReader::new(file))
            }
            None => None,
        };
        Ok(Drain {
            buffer: self,
            offset: 0,
            spilled,
        })
    }

    /// Drops every record and resets the counters.
    pub fn clear(&mut self) {
        self.resident.clear();
        self.spill = None;
        self.count = 0;
        self.data_size = 0;
    }
}

/// Single-pass iterator over a buffer's records.
pub struct Drain<'a> {
    buffer: &'a mut ChangeBuffer,
    offset: usize,
    spilled: Option<BufReader<File>>,
}

impl Drain<'_> {
    fn next_record(&mut self) -> Result<Option<Vec<u8>>, ReplayError> {
        if self.buffer.count == 0 {
            return Ok(None);
        }

        let resident = &self.buffer.resident;
        if self.offset < resident.len() {
            let rest = &resident[self.offset..];
            let len = codec::record_len(rest)?;
            let record = rest.get(..len).ok_or_else(|| ReplayError::CorruptRecord {
                reason: format!(
                    "record of {} bytes runs past the {} buffered bytes",
                    len,
                    rest.len()
                ),
            })?;
            self.offset += len;
            return Ok(Some(record.to_vec()));
        }

        let Some(reader) = self.spilled.as_mut() else {
            return Err(ReplayError::CorruptRecord {
                reason: format!("{} records missing from buffer", self.buffer.count),
            });
        };
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header)?;
        let len = codec::record_len(&header)?;
        let mut record = vec![0u8; len];
        record[..HEADER_LEN].copy_from_slice(&header);
        reader.read_exact(&mut record[HEADER_LEN..])?;
        Ok(Some(record))
    }
}

impl Iterator for Drain<'_> {
    type Item = Result<ChangeEvent, ReplayError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                self.buffer.clear();
                return Some(Err(e));
            }
        };
        self.buffer.count -= 1;
        self.buffer.data_size = self.buffer.data_size.saturating_sub(record.len());
        Some(codec::decode(&record))
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        self.buffer.clear();
    }
}
