//! Schema fingerprints.
//!
//! A fingerprint is a crc32 over everything that determines how row images
//! and index keys are laid out. Capturing one before a rebuild and comparing
//! it later detects column or index changes made in the meantime.

use std::fmt;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::table::Table;

/// Checksum of a table's layout and index definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaFingerprint(pub u32);

impl SchemaFingerprint {
    /// Computes the fingerprint of a table.
    pub fn of(table: &Table) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(table.name.as_bytes());
        hasher.update(&table.id.0.to_le_bytes());
        hasher.update(&(table.record_size as u64).to_le_bytes());

        for field in &table.fields {
            hasher.update(field.name.as_bytes());
            hasher.update(&[0]);
            hasher.update(field.type_id.as_bytes());
            hasher.update(&[0]);
            hasher.update(&(field.offset as u64).to_le_bytes());
            hasher.update(&(field.size as u64).to_le_bytes());
        }

        for index in table.indexes() {
            hasher.update(&index.id().0.to_le_bytes());
            hasher.update(&[index.has_exclusion_constraint() as u8]);
            for column in index.columns() {
                hasher.update(&(column.position as u64).to_le_bytes());
            }
        }

        Self(hasher.finalize())
    }
}

impl fmt::Display for SchemaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
