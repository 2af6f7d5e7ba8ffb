//! Aligned row images.
//!
//! A row is the fixed-size byte image of one record. Bytes handed over by a
//! buffer or a file carry no alignment guarantee, so every `Row` owns a fresh
//! allocation aligned to 8 bytes and callers copy into it.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::DbError;
use crate::table::Field;

const WORD: usize = std::mem::size_of::<u64>();

/// Owned row image backed by 8-byte aligned storage.
#[derive(Clone)]
pub struct Row {
    words: Box<[u64]>,
    len: usize,
}

impl Row {
    /// Creates a zero-filled row of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        let words = len.div_ceil(WORD);
        Self {
            words: vec![0u64; words].into_boxed_slice(),
            len,
        }
    }

    /// Copies possibly unaligned bytes into a freshly allocated aligned row.
    pub fn from_unaligned(bytes: &[u8]) -> Self {
        let mut row = Self::zeroed(bytes.len());
        row.as_bytes_mut().copy_from_slice(bytes);
        row
    }

    /// Returns the row length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the row holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the row image.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` holds at least `len` initialized bytes and u8 has
        // no alignment requirement.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    /// Returns the row image for modification.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: same bounds as `as_bytes`; the borrow is unique.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }

    /// Returns the address of the first byte. Always a multiple of 8.
    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    /// Returns the bytes of a field.
    pub fn field(&self, field: &Field) -> Result<&[u8], DbError> {
        self.as_bytes()
            .get(field.offset..field.end_offset())
            .ok_or_else(|| DbError::FieldExceedsRecordSize {
                field: field.name.clone(),
                offset: field.offset,
                size: field.size,
                record_size: self.len,
            })
    }

    /// Overwrites the bytes of a field.
    pub fn set_field(&mut self, field: &Field, value: &[u8]) -> Result<(), DbError> {
        if value.len() != field.size {
            return Err(DbError::TypeMismatch {
                expected: format!("{} bytes for field '{}'", field.size, field.name),
                got: format!("{} bytes", value.len()),
            });
        }
        let len = self.len;
        let slot = self
            .as_bytes_mut()
            .get_mut(field.offset..field.end_offset())
            .ok_or_else(|| DbError::FieldExceedsRecordSize {
                field: field.name.clone(),
                offset: field.offset,
                size: field.size,
                record_size: len,
            })?;
        slot.copy_from_slice(value);
        Ok(())
    }

    /// Reads a little-endian u64 at the given byte offset.
    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        let bytes = self.as_bytes().get(offset..offset + WORD)?;
        let mut buf = [0u8; WORD];
        buf.copy_from_slice(bytes);
        Some(u64::from_le_bytes(buf))
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Row {}

impl Hash for Row {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.as_bytes();
        let shown = &bytes[..bytes.len().min(16)];
        f.debug_struct("Row")
            .field("len", &self.len)
            .field("head", &shown)
            .finish_non_exhaustive()
    }
}
