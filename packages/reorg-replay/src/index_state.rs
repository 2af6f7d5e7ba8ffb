//! Write access to the replacement table's secondary indexes.

use std::sync::Arc;

use reorg_core::table::{Index, IndexHandle, IndexId, KeyColumn};
use reorg_core::{Location, RelationId, Row, Table};

use crate::error::ReplayError;

/// Columns that re-locate a row in the replacement table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    index: IndexId,
    columns: Vec<KeyColumn>,
}

impl IdentityKey {
    /// Identity key made of the key columns of `index`.
    pub fn from_index(index: &Index) -> Self {
        Self {
            index: index.id(),
            columns: index.columns().to_vec(),
        }
    }

    pub fn index_id(&self) -> IndexId {
        self.index
    }

    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    /// Extracts the key of a row image.
    pub fn key_of(&self, row: &Row) -> Result<Vec<u8>, ReplayError> {
        let record = row.as_bytes();
        let mut key = Vec::with_capacity(self.columns.iter().map(|c| c.size).sum());
        for column in &self.columns {
            let bytes = column.bytes(record).ok_or_else(|| ReplayError::CorruptRecord {
                reason: format!(
                    "row of {} bytes lacks identity column '{}' at offset {}",
                    record.len(),
                    column.name,
                    column.offset
                ),
            })?;
            key.extend_from_slice(bytes);
        }
        Ok(key)
    }
}

/// Open write handles on every index of the replacement table.
///
/// Exclusion constraints are not evaluated: the original table already
/// enforced them for every change being replayed. Handles close when the
/// state is closed or dropped.
#[derive(Debug)]
pub struct IndexInsertState {
    table: RelationId,
    handles: Vec<IndexHandle>,
    identity: usize,
}

impl IndexInsertState {
    /// Opens all indexes of `table` and locates the identity index.
    pub fn open(table: &Table, identity_index: IndexId) -> Result<Self, ReplayError> {
        let mut handles = Vec::with_capacity(table.indexes().len());
        let mut identity = None;
        for index in table.indexes() {
            let mut handle = index.open();
            handle.disable_exclusion_checks();
            if index.id() == identity_index {
                identity = Some(handles.len());
            }
            handles.push(handle);
        }

        // Handles opened so far close on this early return.
        let identity = identity.ok_or_else(|| ReplayError::IdentityIndexMissing {
            index: identity_index.0,
            table: table.name.clone(),
        })?;

        tracing::debug!(
            "Opened {} indexes of table {} for replay",
            handles.len(),
            table.name
        );
        Ok(Self {
            table: table.id,
            handles,
            identity,
        })
    }

    /// Relation the indexes belong to.
    pub fn table_id(&self) -> RelationId {
        self.table
    }

    pub fn identity_index(&self) -> &Arc<Index> {
        self.handles[self.identity].index()
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::from_index(self.identity_index())
    }

    pub fn handles(&self) -> &[IndexHandle] {
        &self.handles
    }

    /// Adds entries for a row stored at `location` to every index.
    pub fn insert_into_all_indexes(&self, row: &Row, location: Location) -> Result<(), ReplayError> {
        for handle in &self.handles {
            handle.insert_row(row.as_bytes(), location)?;
        }
        Ok(())
    }

    /// Adds index entries for an updated row if the update moved it.
    ///
    /// Returns whether the row was relocated.
    pub fn update_indexes_if_relocated(
        &self,
        row: &Row,
        old_location: Location,
        new_location: Location,
    ) -> Result<bool, ReplayError> {
        if old_location == new_location {
            return Ok(false);
        }
        self.insert_into_all_indexes(row, new_location)?;
        Ok(true)
    }

    /// Closes every handle.
    pub fn close(self) {
        tracing::trace!("Closing {} index handles", self.handles.len());
    }
}
