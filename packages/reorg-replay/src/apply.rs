//! Replays buffered changes onto the replacement table.

use std::ops::AddAssign;

use reorg_core::table::BulkInsertState;
use reorg_core::{Row, Table, VisibilityCounter};
use serde::{Deserialize, Serialize};

use crate::buffer::ChangeBuffer;
use crate::codec::ChangeKind;
use crate::error::ReplayError;
use crate::index_state::{IdentityKey, IndexInsertState};
use crate::Result;

/// Counts of changes applied by replay passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl ReplayStats {
    /// Total number of applied changes.
    pub fn total(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}

impl AddAssign for ReplayStats {
    fn add_assign(&mut self, other: Self) {
        self.inserts += other.inserts;
        self.updates += other.updates;
        self.deletes += other.deletes;
    }
}

/// Old image of an update whose new image has not been replayed yet.
///
/// Survives the end of a pass when the decoder split the pair at the memory
/// threshold.
#[derive(Debug, Default)]
pub struct PendingOldRow(Option<Row>);

impl PendingOldRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.0.is_some()
    }

    pub fn row(&self) -> Option<&Row> {
        self.0.as_ref()
    }

    fn set(&mut self, row: Row) -> Result<()> {
        if self.0.is_some() {
            return Err(ReplayError::InvariantViolation(
                "old row image received while another one is pending".to_string(),
            ));
        }
        self.0 = Some(row);
        Ok(())
    }

    fn take(&mut self) -> Option<Row> {
        self.0.take()
    }

    fn ensure_empty(&self, kind: ChangeKind) -> Result<()> {
        if self.0.is_some() {
            return Err(ReplayError::InvariantViolation(format!(
                "{kind} received while an old row image is pending"
            )));
        }
        Ok(())
    }
}

/// Applies every buffered change to `table`, in order, and empties the buffer.
///
/// Each applied change except an old update image advances `visibility`, so
/// the next lookup sees it. A trailing old image is left in `pending` for the
/// next pass. The pass is not preemptible; on error it stops at the failing
/// change and the buffer is discarded.
pub fn apply_concurrent_changes(
    buffer: &mut ChangeBuffer,
    table: &mut Table,
    identity: &IdentityKey,
    iistate: &IndexInsertState,
    visibility: &mut VisibilityCounter,
    pending: &mut PendingOldRow,
) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    if buffer.is_empty() {
        return Ok(stats);
    }
    if identity.index_id() != iistate.identity_index().id() {
        return Err(ReplayError::InvariantViolation(format!(
            "identity key of index {} does not match identity index {}",
            identity.index_id(),
            iistate.identity_index().id()
        )));
    }

    let mut bulk: Option<BulkInsertState> = None;

    for event in buffer.drain()? {
        let event = event?;
        let kind = event.kind();

        // Only keep the bulk insert state across consecutive inserts.
        if kind != ChangeKind::Insert {
            bulk = None;
        }

        match kind {
            ChangeKind::UpdateOld => {
                pending.set(event.into_row())?;
                continue;
            }
            ChangeKind::Insert => {
                pending.ensure_empty(kind)?;
                let row = event.into_row();
                let state = bulk.get_or_insert_with(|| table.begin_bulk_insert());
                let location = table.insert(&row, visibility.current(), Some(state))?;
                iistate.insert_into_all_indexes(&row, location)?;
                tracing::trace!("Replayed insert at {}", location);
                stats.inserts += 1;
            }
            ChangeKind::UpdateNew => {
                let row = event.into_row();
                let key_row = pending.take();
                let key = identity.key_of(key_row.as_ref().unwrap_or(&row))?;
                let (_, location) = table
                    .scan_equal(iistate.identity_index(), &key, visibility.snapshot())?
                    .ok_or_else(|| lookup_miss(kind, &key))?;
                let new_location = table.update(location, &row, visibility.current())?;
                iistate.update_indexes_if_relocated(&row, location, new_location)?;
                tracing::trace!("Replayed update {} -> {}", location, new_location);
                stats.updates += 1;
            }
            ChangeKind::Delete => {
                pending.ensure_empty(kind)?;
                let key = identity.key_of(event.row())?;
                let (_, location) = table
                    .scan_equal(iistate.identity_index(), &key, visibility.snapshot())?
                    .ok_or_else(|| lookup_miss(kind, &key))?;
                table.delete(location, visibility.current())?;
                tracing::trace!("Replayed delete at {}", location);
                stats.deletes += 1;
            }
        }

        visibility.advance();
    }

    tracing::debug!(
        "Concurrent changes applied: {} inserts, {} updates, {} deletes",
        stats.inserts,
        stats.updates,
        stats.deletes
    );
    Ok(stats)
}

fn lookup_miss(kind: ChangeKind, key: &[u8]) -> ReplayError {
    ReplayError::LookupMiss {
        kind,
        key: hex::encode(key),
    }
}
