//! Schema consistency checks between replay passes.
//!
//! Buffered changes are only applicable while the original table keeps the
//! schema captured when the rebuild started. The coordinator asks a
//! [`ConsistencyChecker`] before every replay pass.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use reorg_core::schema::SchemaFingerprint;
use reorg_core::{RelationId, Table};
use serde::{Deserialize, Serialize};

use crate::error::SchemaChanged;

/// Lock the rebuild currently holds on the original table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    NoLock,
    /// Blocks concurrent schema changes but not writers
    ShareUpdateExclusive,
    /// Blocks everything, schema changes included
    AccessExclusive,
}

/// Schema snapshot captured before the rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyToken {
    relation: RelationId,
    fingerprint: SchemaFingerprint,
}

impl ConsistencyToken {
    pub fn new(relation: RelationId, fingerprint: SchemaFingerprint) -> Self {
        Self {
            relation,
            fingerprint,
        }
    }

    /// Captures the current schema of `table`.
    pub fn capture(table: &Table) -> Self {
        Self::new(table.id, SchemaFingerprint::of(table))
    }

    pub fn relation(&self) -> RelationId {
        self.relation
    }

    pub fn fingerprint(&self) -> SchemaFingerprint {
        self.fingerprint
    }
}

/// Validates that the captured schema snapshot still holds.
pub trait ConsistencyChecker {
    fn validate(&self, token: &ConsistencyToken, lock_held: LockMode) -> Result<(), SchemaChanged>;
}

/// Checker comparing the token against the most recently published
/// fingerprint of the original table.
///
/// Clones share the published value, so whoever alters the original table
/// can publish from another thread.
#[derive(Debug, Clone)]
pub struct FingerprintChecker {
    current: Arc<AtomicU32>,
}

impl FingerprintChecker {
    pub fn new(current: SchemaFingerprint) -> Self {
        Self {
            current: Arc::new(AtomicU32::new(current.0)),
        }
    }

    /// Publishes the original table's current fingerprint.
    pub fn publish(&self, fingerprint: SchemaFingerprint) {
        self.current.store(fingerprint.0, Ordering::Release);
    }

    pub fn current(&self) -> SchemaFingerprint {
        SchemaFingerprint(self.current.load(Ordering::Acquire))
    }
}

impl ConsistencyChecker for FingerprintChecker {
    fn validate(&self, token: &ConsistencyToken, lock_held: LockMode) -> Result<(), SchemaChanged> {
        // No schema change can be running under an exclusive lock.
        if lock_held == LockMode::AccessExclusive {
            return Ok(());
        }

        let found = self.current();
        if found != token.fingerprint() {
            tracing::warn!(
                "Schema of relation {} changed during rebuild",
                token.relation()
            );
            return Err(SchemaChanged {
                relation: token.relation(),
                expected: token.fingerprint(),
                found,
            });
        }
        Ok(())
    }
}
