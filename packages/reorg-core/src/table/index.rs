//! Secondary indexes over the heap.
//!
//! An index maps the concatenated bytes of its key columns to every heap
//! location ever inserted under that key. Entries are not removed when a
//! row is deleted or relocated; lookups recheck the heap for visibility and
//! `Table::vacuum` prunes entries whose slot is dead.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::field::Field;
use super::table::{Location, RelationId};
use crate::error::DbError;

/// Index identifier, unique per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexId(pub u32);

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Index identifier
    pub id: IndexId,
    /// Index name
    pub name: String,
    /// Key column names in key order
    pub columns: Vec<String>,
    /// Whether the index enforces an exclusion (uniqueness) constraint
    pub exclusion: bool,
}

impl IndexDef {
    /// Creates an index definition.
    pub fn new(id: u32, name: impl Into<String>, columns: &[&str], exclusion: bool) -> Self {
        Self {
            id: IndexId(id),
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            exclusion,
        }
    }
}

/// One key column of an index, resolved against the table layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyColumn {
    /// Position of the column among the table's fields
    pub position: usize,
    /// Column name
    pub name: String,
    /// Column type identifier
    pub type_id: String,
    /// Byte offset within the record
    pub offset: usize,
    /// Column size in bytes
    pub size: usize,
}

impl KeyColumn {
    /// Returns the column bytes of a record image.
    pub fn bytes<'a>(&self, record: &'a [u8]) -> Option<&'a [u8]> {
        record.get(self.offset..self.offset + self.size)
    }
}

/// Secondary index over one table.
#[derive(Debug)]
pub struct Index {
    id: IndexId,
    name: String,
    table: RelationId,
    columns: Vec<KeyColumn>,
    exclusion: bool,
    entries: RwLock<BTreeMap<Vec<u8>, Vec<Location>>>,
    open_handles: AtomicUsize,
}

impl Index {
    /// Resolves an index definition against the table's fields.
    pub(crate) fn build(
        def: IndexDef,
        table: RelationId,
        table_name: &str,
        fields: &[Field],
    ) -> Result<Self, DbError> {
        if def.columns.is_empty() {
            return Err(DbError::EmptyIndexKey { index: def.name });
        }

        let mut columns = Vec::with_capacity(def.columns.len());
        for column in &def.columns {
            let position = fields
                .iter()
                .position(|f| &f.name == column)
                .ok_or_else(|| DbError::FieldNotFound {
                    table: table_name.to_string(),
                    field: column.clone(),
                })?;
            let field = &fields[position];
            columns.push(KeyColumn {
                position,
                name: field.name.clone(),
                type_id: field.type_id.clone(),
                offset: field.offset,
                size: field.size,
            });
        }

        Ok(Self {
            id: def.id,
            name: def.name,
            table,
            columns,
            exclusion: def.exclusion,
            entries: RwLock::new(BTreeMap::new()),
            open_handles: AtomicUsize::new(0),
        })
    }

    /// Returns the index identifier.
    pub fn id(&self) -> IndexId {
        self.id
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the id of the indexed table.
    pub fn table_id(&self) -> RelationId {
        self.table
    }

    /// Returns the key columns in key order.
    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    /// Returns whether inserts are checked against an exclusion constraint.
    pub fn has_exclusion_constraint(&self) -> bool {
        self.exclusion
    }

    /// Builds the index key of a record image.
    pub fn key_for(&self, record: &[u8]) -> Result<Vec<u8>, DbError> {
        let mut key = Vec::with_capacity(self.columns.iter().map(|c| c.size).sum());
        for column in &self.columns {
            let bytes = column
                .bytes(record)
                .ok_or_else(|| DbError::FieldExceedsRecordSize {
                    field: column.name.clone(),
                    offset: column.offset,
                    size: column.size,
                    record_size: record.len(),
                })?;
            key.extend_from_slice(bytes);
        }
        Ok(key)
    }

    /// Returns every location recorded under `key`, oldest first.
    pub fn lookup(&self, key: &[u8]) -> Result<Vec<Location>, DbError> {
        let entries = self.entries.read().map_err(|_| DbError::LockPoisoned)?;
        Ok(entries.get(key).cloned().unwrap_or_default())
    }

    /// Returns the number of (key, location) entries.
    pub fn entry_count(&self) -> Result<usize, DbError> {
        let entries = self.entries.read().map_err(|_| DbError::LockPoisoned)?;
        Ok(entries.values().map(Vec::len).sum())
    }

    /// Returns the number of write handles currently open.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::Acquire)
    }

    /// Opens a write handle. Exclusion checks follow the index definition.
    pub fn open(self: &Arc<Self>) -> IndexHandle {
        self.open_handles.fetch_add(1, Ordering::AcqRel);
        IndexHandle {
            index: Arc::clone(self),
            check_exclusion: self.exclusion,
        }
    }

    pub(crate) fn insert_entry(
        &self,
        key: Vec<u8>,
        location: Location,
        check_exclusion: bool,
    ) -> Result<(), DbError> {
        let mut entries = self.entries.write().map_err(|_| DbError::LockPoisoned)?;
        let locations = entries.entry(key).or_default();
        if locations.contains(&location) {
            return Ok(());
        }
        if check_exclusion && !locations.is_empty() {
            let key = describe_conflict(&self.columns, locations, &location);
            return Err(DbError::ExclusionViolation {
                index: self.name.clone(),
                key,
            });
        }
        locations.push(location);
        Ok(())
    }

    /// Drops entries whose location fails `keep`; returns how many were removed.
    pub(crate) fn retain<F>(&self, mut keep: F) -> Result<usize, DbError>
    where
        F: FnMut(Location) -> bool,
    {
        let mut entries = self.entries.write().map_err(|_| DbError::LockPoisoned)?;
        let mut removed = 0;
        entries.retain(|_, locations| {
            let before = locations.len();
            locations.retain(|loc| keep(*loc));
            removed += before - locations.len();
            !locations.is_empty()
        });
        Ok(removed)
    }
}

fn describe_conflict(columns: &[KeyColumn], existing: &[Location], new: &Location) -> String {
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    format!(
        "({}) at {} conflicts with {:?}",
        names.join(", "),
        new,
        existing
    )
}

/// Write handle on an index.
///
/// Dropping the handle closes it.
#[derive(Debug)]
pub struct IndexHandle {
    index: Arc<Index>,
    check_exclusion: bool,
}

impl IndexHandle {
    /// Returns the underlying index.
    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    /// Returns whether inserts through this handle evaluate exclusion constraints.
    pub fn checks_exclusion(&self) -> bool {
        self.check_exclusion
    }

    /// Stops evaluating exclusion constraints for inserts through this handle.
    pub fn disable_exclusion_checks(&mut self) {
        self.check_exclusion = false;
    }

    /// Adds an entry for a record image stored at `location`.
    pub fn insert_row(&self, record: &[u8], location: Location) -> Result<(), DbError> {
        let key = self.index.key_for(record)?;
        self.index.insert_entry(key, location, self.check_exclusion)
    }

    /// Closes the handle.
    pub fn close(self) {}
}

impl Drop for IndexHandle {
    fn drop(&mut self) {
        self.index.open_handles.fetch_sub(1, Ordering::AcqRel);
    }
}
