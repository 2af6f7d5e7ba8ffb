//! Replay error types.
//!
//! Every error is fatal to the rebuild: the caller abandons the replacement
//! table. Deadline expiry is not an error and is reported through
//! [`ProcessOutcome`](crate::coordinator::ProcessOutcome).

use reorg_core::error::DbError;
use reorg_core::schema::SchemaFingerprint;
use reorg_core::RelationId;
use thiserror::Error;

use crate::codec::ChangeKind;

/// The original table's schema no longer matches the captured snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Schema of relation {relation} changed: expected fingerprint {expected}, found {found}")]
pub struct SchemaChanged {
    pub relation: RelationId,
    pub expected: SchemaFingerprint,
    pub found: SchemaFingerprint,
}

/// Change capture and replay errors.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// Buffered record is truncated, mis-sized or fails its checksum
    #[error("Corrupt change record: {reason}")]
    CorruptRecord { reason: String },

    /// Source stream delivered data that cannot be turned into a change
    #[error("Failed to decode change stream: {reason}")]
    Decode { reason: String },

    /// Record carries a kind tag outside the known set
    #[error("Unrecognized kind of change: {0}")]
    UnrecognizedChangeKind(u8),

    /// Schema of the original table changed during the rebuild
    #[error(transparent)]
    SchemaChanged(#[from] SchemaChanged),

    /// Update or delete found no matching row in the replacement table
    #[error("Failed to find target row for {kind} with identity key {key}")]
    LookupMiss { kind: ChangeKind, key: String },

    /// Change sequence broke the update pairing rules
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// Identity index is not among the replacement table's indexes
    #[error("Identity index {index} not found on table '{table}'")]
    IdentityIndexMissing { index: u32, table: String },

    /// Replacement table storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    /// Spill file failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Processing was cancelled by request
    #[error("Processing cancelled")]
    Cancelled,
}
