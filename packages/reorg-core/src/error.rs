//! Storage error types.

use thiserror::Error;

/// Replacement-table storage errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    /// Field not found in table
    #[error("Field '{field}' not found in table '{table}'")]
    FieldNotFound { table: String, field: String },

    /// Field already exists in table
    #[error("Field '{field}' already exists in table '{table}'")]
    FieldAlreadyExists { table: String, field: String },

    /// Field exceeds record size boundaries
    #[error("Field '{field}' (offset={offset}, size={size}) exceeds record size {record_size}")]
    FieldExceedsRecordSize {
        field: String,
        offset: usize,
        size: usize,
        record_size: usize,
    },

    /// Field offset violates the field's alignment or overlaps a neighbour
    #[error("Invalid layout for field '{field}': {reason}")]
    InvalidFieldLayout { field: String, reason: String },

    /// Capacity calculation overflow
    #[error("Capacity overflow during {operation}")]
    CapacityOverflow { operation: &'static str },

    /// Type mismatch error
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Location outside the table's slot range
    #[error("Invalid location {location} for table '{table}' (slots: {slots})")]
    InvalidLocation {
        table: String,
        location: usize,
        slots: usize,
    },

    /// Row at the location was already deleted or superseded
    #[error("Row at location {location} in table '{table}' is not live")]
    RowNotLive { table: String, location: usize },

    /// Index does not exist on the table
    #[error("Index {index} not found on table '{table}'")]
    IndexNotFound { table: String, index: u32 },

    /// Index id already used on the table
    #[error("Index {index} already exists on table '{table}'")]
    IndexAlreadyExists { table: String, index: u32 },

    /// Index definition without key columns
    #[error("Index '{index}' has no key columns")]
    EmptyIndexKey { index: String },

    /// Exclusion constraint rejected an index entry
    #[error("Exclusion constraint of index '{index}' violated by key {key}")]
    ExclusionViolation { index: String, key: String },

    /// Lock poisoned (RwLock poisoned)
    #[error("Lock poisoned")]
    LockPoisoned,

    /// Memory limit exceeded for heap growth
    #[error("Memory limit exceeded for table '{table}': requested {requested} bytes, limit {limit} bytes")]
    MemoryLimitExceeded {
        requested: usize,
        limit: usize,
        table: String,
    },
}
