//! Heap table and slot management.
//!
//! Each table has:
//! - Fixed schema with field definitions
//! - A contiguous record buffer addressed by slot
//! - Per-slot visibility stamps (creating and deleting command ids)
//! - Secondary indexes sharing the heap's locations
//!
//! Slots are never reused or compacted, so a `Location` stays valid for the
//! table's lifetime. Deleting or relocating a row only stamps its slot.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DbConfig;
use crate::error::DbError;
use crate::row::Row;
use crate::visibility::CommandId;

use super::field::Field;
use super::index::{Index, IndexDef, IndexId};
use super::validation;

/// Relation identifier of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical location of a row version (heap slot number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location(pub usize);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotHeader {
    xmin: CommandId,
    xmax: Option<CommandId>,
}

impl SlotHeader {
    fn is_live(&self) -> bool {
        self.xmax.is_none()
    }

    fn visible_to(&self, snapshot: CommandId) -> bool {
        self.xmin < snapshot && self.xmax.map_or(true, |xmax| xmax >= snapshot)
    }
}

/// Reusable state for a run of consecutive inserts.
///
/// Reserves heap capacity a batch at a time so a run of inserts does not
/// grow the record buffer once per row. Dropping it releases the remaining
/// reservation bookkeeping.
#[derive(Debug)]
pub struct BulkInsertState {
    batch: usize,
    reserved: usize,
    inserted: usize,
}

impl BulkInsertState {
    /// Number of rows inserted through this state.
    pub fn inserted(&self) -> usize {
        self.inserted
    }
}

/// Heap table with command-id visibility.
#[derive(Debug)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Relation identifier
    pub id: RelationId,
    /// Size of each record in bytes
    pub record_size: usize,
    /// Field definitions in declaration order
    pub fields: Vec<Field>,
    data: Vec<u8>,
    slots: Vec<SlotHeader>,
    indexes: Vec<Arc<Index>>,
    max_buffer_size: usize,
    bulk_insert_batch: usize,
    last_command: CommandId,
}

impl Table {
    /// Creates a new table with the given name and field definitions.
    ///
    /// # Arguments
    /// * `name` - Table name
    /// * `id` - Relation identifier
    /// * `fields` - Field definitions
    /// * `initial_capacity` - Initial buffer capacity in records (default: 1024)
    /// * `max_buffer_size` - Heap size limit in bytes
    pub fn create(
        name: String,
        id: RelationId,
        fields: Vec<Field>,
        initial_capacity: Option<usize>,
        max_buffer_size: usize,
    ) -> Result<Self, DbError> {
        let mut seen_names = std::collections::HashSet::new();
        for field in &fields {
            if !seen_names.insert(&field.name) {
                return Err(DbError::FieldAlreadyExists {
                    table: name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        let record_size = validation::calculate_record_size(&fields)?;
        validation::validate_record_size(&fields, record_size)?;
        validation::validate_field_layout(&fields)?;

        let capacity_records = initial_capacity.unwrap_or(1024);
        let capacity_bytes =
            capacity_records
                .checked_mul(record_size)
                .ok_or(DbError::CapacityOverflow {
                    operation: "initial buffer allocation",
                })?;

        if capacity_bytes > max_buffer_size {
            return Err(DbError::MemoryLimitExceeded {
                requested: capacity_bytes,
                limit: max_buffer_size,
                table: name,
            });
        }

        Ok(Self {
            name,
            id,
            record_size,
            fields,
            data: Vec::with_capacity(capacity_bytes),
            slots: Vec::with_capacity(capacity_records),
            indexes: Vec::new(),
            max_buffer_size,
            bulk_insert_batch: DbConfig::default().bulk_insert_batch,
            last_command: CommandId::FROZEN,
        })
    }

    /// Creates a table sized by a storage configuration.
    pub fn with_config(
        name: String,
        id: RelationId,
        fields: Vec<Field>,
        config: &DbConfig,
    ) -> Result<Self, DbError> {
        let mut table = Self::create(
            name,
            id,
            fields,
            Some(config.initial_table_capacity),
            config.max_buffer_size,
        )?;
        table.bulk_insert_batch = config.bulk_insert_batch.max(1);
        Ok(table)
    }

    /// Returns the field definition for the given field name.
    pub fn get_field(&self, field_name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == field_name)
    }

    /// Returns the byte offset of a field within a record.
    pub fn field_offset(&self, field_name: &str) -> Result<usize, DbError> {
        self.get_field(field_name)
            .map(|f| f.offset)
            .ok_or_else(|| DbError::FieldNotFound {
                table: self.name.clone(),
                field: field_name.to_string(),
            })
    }

    /// Builds a row image from field values in declaration order.
    pub fn build_row(&self, field_values: &[&[u8]]) -> Result<Row, DbError> {
        if field_values.len() != self.fields.len() {
            return Err(DbError::TypeMismatch {
                expected: format!("{} fields", self.fields.len()),
                got: format!("{} fields", field_values.len()),
            });
        }

        let mut row = Row::zeroed(self.record_size);
        for (field, value) in self.fields.iter().zip(field_values) {
            row.set_field(field, value)?;
        }
        Ok(row)
    }

    /// Number of slots ever allocated, live or dead.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots not yet deleted or superseded.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_live()).count()
    }

    /// Highest command id that has written to this table.
    pub fn last_command(&self) -> CommandId {
        self.last_command
    }

    /// Returns the table's secondary indexes.
    pub fn indexes(&self) -> &[Arc<Index>] {
        &self.indexes
    }

    /// Returns the index with the given id.
    pub fn index(&self, id: IndexId) -> Result<&Arc<Index>, DbError> {
        self.indexes
            .iter()
            .find(|i| i.id() == id)
            .ok_or_else(|| DbError::IndexNotFound {
                table: self.name.clone(),
                index: id.0,
            })
    }

    /// Creates a secondary index and fills it from the live rows.
    pub fn create_index(&mut self, def: IndexDef) -> Result<Arc<Index>, DbError> {
        if self.indexes.iter().any(|i| i.id() == def.id) {
            return Err(DbError::IndexAlreadyExists {
                table: self.name.clone(),
                index: def.id.0,
            });
        }

        let index = Arc::new(Index::build(def, self.id, &self.name, &self.fields)?);
        let check = index.has_exclusion_constraint();
        for (slot, header) in self.slots.iter().enumerate() {
            if header.is_live() {
                let key = index.key_for(self.record_slice(slot))?;
                index.insert_entry(key, Location(slot), check)?;
            }
        }

        tracing::trace!(
            "Created index {} on table {} with {} columns",
            index.name(),
            self.name,
            index.columns().len()
        );
        self.indexes.push(Arc::clone(&index));
        Ok(index)
    }

    /// Starts a run of consecutive inserts.
    pub fn begin_bulk_insert(&self) -> BulkInsertState {
        BulkInsertState {
            batch: self.bulk_insert_batch,
            reserved: 0,
            inserted: 0,
        }
    }

    /// Inserts a row version stamped with `cid`. Indexes are not touched.
    pub fn insert(
        &mut self,
        row: &Row,
        cid: CommandId,
        bulk: Option<&mut BulkInsertState>,
    ) -> Result<Location, DbError> {
        self.check_row_size(row)?;
        self.ensure_room(1)?;

        if let Some(state) = bulk {
            if state.reserved == 0 {
                let room = (self.max_buffer_size - self.data.len()) / self.record_size.max(1);
                let batch = state.batch.min(room.max(1));
                self.data.reserve(batch * self.record_size);
                self.slots.reserve(batch);
                state.reserved = batch;
            }
            state.reserved -= 1;
            state.inserted += 1;
        }

        Ok(self.push_slot(row, cid))
    }

    /// Loads a row the way the bulk copy does: visible to every snapshot and
    /// entered into every index with constraint checks.
    pub fn copy_in(&mut self, row: &Row) -> Result<Location, DbError> {
        let location = self.insert(row, CommandId::FROZEN, None)?;
        for index in &self.indexes {
            let key = index.key_for(row.as_bytes())?;
            index.insert_entry(key, location, index.has_exclusion_constraint())?;
        }
        Ok(location)
    }

    /// Replaces the row at `location` with a new version stamped with `cid`.
    ///
    /// When no indexed column changes the version is rewritten in place and
    /// the same location is returned. Otherwise the old slot is retired and
    /// the new version goes to a fresh slot whose location is returned.
    pub fn update(
        &mut self,
        location: Location,
        row: &Row,
        cid: CommandId,
    ) -> Result<Location, DbError> {
        self.check_row_size(row)?;
        self.check_live(location)?;

        let old = self.record_slice(location.0);
        let mut keys_unchanged = true;
        for index in &self.indexes {
            if index.key_for(old)? != index.key_for(row.as_bytes())? {
                keys_unchanged = false;
                break;
            }
        }

        if keys_unchanged {
            let start = location.0 * self.record_size;
            self.data[start..start + self.record_size].copy_from_slice(row.as_bytes());
            self.slots[location.0].xmin = cid;
            self.note_command(cid);
            return Ok(location);
        }

        self.ensure_room(1)?;
        self.slots[location.0].xmax = Some(cid);
        Ok(self.push_slot(row, cid))
    }

    /// Retires the row at `location` as of `cid`.
    pub fn delete(&mut self, location: Location, cid: CommandId) -> Result<(), DbError> {
        self.check_live(location)?;
        self.slots[location.0].xmax = Some(cid);
        self.note_command(cid);
        Ok(())
    }

    /// Copies the row version stored at `location`.
    pub fn read_row(&self, location: Location) -> Result<Row, DbError> {
        self.check_location(location)?;
        Ok(Row::from_unaligned(self.record_slice(location.0)))
    }

    /// Returns whether the version at `location` is visible to `snapshot`.
    pub fn is_visible(&self, location: Location, snapshot: CommandId) -> bool {
        self.slots
            .get(location.0)
            .is_some_and(|s| s.visible_to(snapshot))
    }

    /// Equality scan through `index`: returns the first version visible to
    /// `snapshot` whose key columns equal `key`.
    pub fn scan_equal(
        &self,
        index: &Index,
        key: &[u8],
        snapshot: CommandId,
    ) -> Result<Option<(Row, Location)>, DbError> {
        if index.table_id() != self.id {
            return Err(DbError::IndexNotFound {
                table: self.name.clone(),
                index: index.id().0,
            });
        }

        for location in index.lookup(key)? {
            if !self.is_visible(location, snapshot) {
                continue;
            }
            let record = self.record_slice(location.0);
            // Entries are never rewritten, so recheck the heap version.
            if index.key_for(record)? == key {
                return Ok(Some((Row::from_unaligned(record), location)));
            }
        }
        Ok(None)
    }

    /// Returns every row version visible to `snapshot`, in slot order.
    pub fn visible_rows(&self, snapshot: CommandId) -> Vec<Row> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.visible_to(snapshot))
            .map(|(slot, _)| Row::from_unaligned(self.record_slice(slot)))
            .collect()
    }

    /// Prunes index entries that point at dead slots.
    ///
    /// # Returns
    /// Number of index entries removed.
    pub fn vacuum(&mut self) -> Result<usize, DbError> {
        let slots = &self.slots;
        let mut removed = 0;
        for index in &self.indexes {
            removed += index.retain(|loc| slots.get(loc.0).is_some_and(|s| s.is_live()))?;
        }
        tracing::debug!("Vacuum removed {} index entries from {}", removed, self.name);
        Ok(removed)
    }

    fn record_slice(&self, slot: usize) -> &[u8] {
        let start = slot * self.record_size;
        &self.data[start..start + self.record_size]
    }

    fn push_slot(&mut self, row: &Row, cid: CommandId) -> Location {
        let slot = self.slots.len();
        self.data.extend_from_slice(row.as_bytes());
        self.slots.push(SlotHeader {
            xmin: cid,
            xmax: None,
        });
        self.note_command(cid);
        Location(slot)
    }

    fn note_command(&mut self, cid: CommandId) {
        self.last_command = self.last_command.max(cid);
    }

    fn ensure_room(&self, records: usize) -> Result<(), DbError> {
        let requested = records
            .checked_mul(self.record_size)
            .and_then(|bytes| bytes.checked_add(self.data.len()))
            .ok_or(DbError::CapacityOverflow {
                operation: "heap growth",
            })?;
        if requested > self.max_buffer_size {
            return Err(DbError::MemoryLimitExceeded {
                requested,
                limit: self.max_buffer_size,
                table: self.name.clone(),
            });
        }
        Ok(())
    }

    fn check_row_size(&self, row: &Row) -> Result<(), DbError> {
        if row.len() != self.record_size {
            return Err(DbError::TypeMismatch {
                expected: format!("{} byte record for table '{}'", self.record_size, self.name),
                got: format!("{} bytes", row.len()),
            });
        }
        Ok(())
    }

    fn check_location(&self, location: Location) -> Result<(), DbError> {
        if location.0 >= self.slots.len() {
            return Err(DbError::InvalidLocation {
                table: self.name.clone(),
                location: location.0,
                slots: self.slots.len(),
            });
        }
        Ok(())
    }

    fn check_live(&self, location: Location) -> Result<(), DbError> {
        self.check_location(location)?;
        if !self.slots[location.0].is_live() {
            return Err(DbError::RowNotLive {
                table: self.name.clone(),
                location: location.0,
            });
        }
        Ok(())
    }
}
