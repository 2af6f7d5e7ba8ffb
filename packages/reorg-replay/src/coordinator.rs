//! Top-level decode, check, replay loop of one rebuild.

use std::time::Instant;

use reorg_core::table::IndexId;
use reorg_core::{Table, VisibilityCounter};
use serde::{Deserialize, Serialize};

use crate::apply::{apply_concurrent_changes, PendingOldRow, ReplayStats};
use crate::buffer::ChangeBuffer;
use crate::config::ReplayConfig;
use crate::consistency::{ConsistencyChecker, ConsistencyToken, LockMode};
use crate::decoder::{deadline_elapsed, DecodingState};
use crate::error::ReplayError;
use crate::index_state::{IdentityKey, IndexInsertState};
use crate::interrupt::CancellationFlag;
use crate::stream::{ChangeSource, DecodingCursor, Lsn};
use crate::Result;

/// Result of one [`ConcurrentChanges::process`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// All changes up to the cursor's end bound were applied
    pub complete: bool,
    /// Changes applied during this call
    pub stats: ReplayStats,
    /// Replay passes run during this call
    pub passes: u64,
    /// Cursor position when the call returned
    pub position: Lsn,
}

/// Change capture state of one rebuild.
///
/// Created once the replacement table and its indexes exist; owns the
/// change buffer and the index write handles until [`finish`](Self::finish)
/// or drop.
#[derive(Debug)]
pub struct ConcurrentChanges {
    decoding: DecodingState,
    iistate: IndexInsertState,
    identity: IdentityKey,
    visibility: VisibilityCounter,
    pending: PendingOldRow,
    token: ConsistencyToken,
    cancel: CancellationFlag,
    totals: ReplayStats,
    passes: u64,
}

impl ConcurrentChanges {
    /// Prepares replay onto `table`, locating rows through `identity_index`.
    ///
    /// `token` is the schema snapshot of the original table captured before
    /// its contents were copied.
    pub fn new(
        table: &Table,
        identity_index: IndexId,
        token: ConsistencyToken,
        config: &ReplayConfig,
        cancel: CancellationFlag,
    ) -> Result<Self> {
        let iistate = IndexInsertState::open(table, identity_index)?;
        let identity = iistate.identity_key();
        tracing::debug!(
            "Capturing changes of relation {} into table {} (identity index {})",
            config.relation_id,
            table.name,
            identity_index
        );
        Ok(Self {
            decoding: DecodingState::new(config, cancel.clone()),
            iistate,
            identity,
            visibility: VisibilityCounter::starting_after(table.last_command()),
            pending: PendingOldRow::new(),
            token,
            cancel,
            totals: ReplayStats::default(),
            passes: 0,
        })
    }

    /// Decodes and replays changes until the cursor's end bound is reached
    /// or `deadline` passes.
    ///
    /// The deadline is only checked between decoding and replay: a started
    /// replay pass always runs to completion. When the deadline stops a
    /// decoding window short of the end bound, the buffered changes are kept
    /// for the next call and the outcome is not complete. A window that
    /// reached the end bound is always replayed.
    pub fn process<S, C>(
        &mut self,
        source: &mut S,
        cursor: &mut DecodingCursor,
        checker: &C,
        table: &mut Table,
        lock_held: LockMode,
        deadline: Option<Instant>,
    ) -> Result<ProcessOutcome>
    where
        S: ChangeSource + ?Sized,
        C: ConsistencyChecker + ?Sized,
    {
        if table.id != self.iistate.table_id() {
            return Err(ReplayError::InvariantViolation(format!(
                "replay state belongs to relation {}, not {}",
                self.iistate.table_id(),
                table.id
            )));
        }

        let mut stats = ReplayStats::default();
        let mut passes = 0;
        loop {
            self.cancel.check()?;

            let drained = self
                .decoding
                .decode_concurrent_changes(&mut *source, cursor, deadline)?;

            if !drained && deadline_elapsed(deadline) {
                tracing::debug!(
                    "Deadline reached with {} changes buffered, cursor at {}",
                    self.decoding.buffer().len(),
                    cursor.position()
                );
                return Ok(ProcessOutcome {
                    complete: false,
                    stats,
                    passes,
                    position: cursor.position(),
                });
            }

            if !self.decoding.buffer().is_empty() {
                checker.validate(&self.token, lock_held)?;

                let pass = apply_concurrent_changes(
                    self.decoding.buffer_mut(),
                    table,
                    &self.identity,
                    &self.iistate,
                    &mut self.visibility,
                    &mut self.pending,
                )?;
                stats += pass;
                passes += 1;
                self.totals += pass;
                self.passes += 1;
            }

            if drained {
                break;
            }
        }

        if self.pending.is_pending() {
            return Err(ReplayError::InvariantViolation(
                "old row image not followed by its new image".to_string(),
            ));
        }

        Ok(ProcessOutcome {
            complete: true,
            stats,
            passes,
            position: cursor.position(),
        })
    }

    /// Changes applied over the whole rebuild so far.
    pub fn totals(&self) -> ReplayStats {
        self.totals
    }

    /// Replay passes run over the whole rebuild so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn buffer(&self) -> &ChangeBuffer {
        self.decoding.buffer()
    }

    pub fn visibility(&self) -> &VisibilityCounter {
        &self.visibility
    }

    pub fn index_state(&self) -> &IndexInsertState {
        &self.iistate
    }

    /// Ends change capture, closing the index handles.
    pub fn finish(self) -> ReplayStats {
        if !self.decoding.buffer().is_empty() {
            tracing::warn!(
                "Discarding {} buffered changes at end of capture",
                self.decoding.buffer().len()
            );
        }
        self.iistate.close();
        self.totals
    }
}
