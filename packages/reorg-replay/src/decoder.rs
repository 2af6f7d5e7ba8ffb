//! Drains the source stream into the change buffer.
//!
//! A decoding window reads records until the buffer reaches the memory
//! threshold, the cursor reaches its end bound or the deadline passes.
//! Only changes of the captured relation are kept; transaction markers and
//! other relations' changes are skipped.
//!
//! The threshold is checked before every appended event, so the buffer
//! overshoots it by at most the last event. When an update's old image
//! reaches the threshold, its new image is held back and appended first
//! thing in the next window.

use std::time::Instant;

use reorg_core::RelationId;

use crate::buffer::ChangeBuffer;
use crate::codec::{self, ChangeKind};
use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::interrupt::CancellationFlag;
use crate::stream::{
    ChangeAction, ChangeSource, DecodingCursor, ResourceOwner, SourceAction, SourceChange,
};
use crate::Result;

/// Returns whether `deadline` has been reached. No deadline never elapses.
pub fn deadline_elapsed(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Decoder-side state of one rebuild: the buffer being filled and the
/// resource owner installed in the source while decoding.
#[derive(Debug)]
pub struct DecodingState {
    relation: RelationId,
    buffer: ChangeBuffer,
    resource_owner: Option<ResourceOwner>,
    memory_threshold: usize,
    deferred: Option<Vec<u8>>,
    cancel: CancellationFlag,
}

impl DecodingState {
    pub fn new(config: &ReplayConfig, cancel: CancellationFlag) -> Self {
        Self {
            relation: config.relation_id,
            buffer: ChangeBuffer::new(config.spill_threshold),
            resource_owner: Some(ResourceOwner::new(format!(
                "decoding relation {}",
                config.relation_id
            ))),
            memory_threshold: config.memory_threshold.max(1),
            deferred: None,
            cancel,
        }
    }

    /// Relation whose changes are captured.
    pub fn relation(&self) -> RelationId {
        self.relation
    }

    pub fn buffer(&self) -> &ChangeBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ChangeBuffer {
        &mut self.buffer
    }

    /// Whether an update's new image is waiting for the next window.
    pub fn has_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    /// Decodes changes from `source` into the buffer.
    ///
    /// Returns `true` iff the cursor reached its end bound and nothing is
    /// held back for the next window. Progress is
    /// confirmed to the source on success. The source's resource owner is
    /// restored and its caches invalidated on every exit path.
    pub fn decode_concurrent_changes<S>(
        &mut self,
        source: &mut S,
        cursor: &mut DecodingCursor,
        deadline: Option<Instant>,
    ) -> Result<bool>
    where
        S: ChangeSource + ?Sized,
    {
        let Self {
            relation,
            buffer,
            resource_owner,
            memory_threshold,
            deferred,
            cancel,
        } = self;

        let decoded = {
            let mut window = OwnerSwap::enter(&mut *source, resource_owner)?;
            decode_window(
                window.source(),
                cursor,
                *relation,
                buffer,
                deferred,
                *memory_threshold,
                cancel,
                deadline,
            )
        };
        let decoded = decoded?;

        source.confirm_progress(cursor.position());
        tracing::debug!(
            "Decoded {} changes ({} buffered, {} bytes), cursor at {}",
            decoded,
            buffer.len(),
            buffer.data_size(),
            cursor.position()
        );
        Ok(cursor.is_exhausted() && deferred.is_none())
    }
}

fn decode_window<S>(
    source: &mut S,
    cursor: &mut DecodingCursor,
    relation: RelationId,
    buffer: &mut ChangeBuffer,
    deferred: &mut Option<Vec<u8>>,
    memory_threshold: usize,
    cancel: &CancellationFlag,
    deadline: Option<Instant>,
) -> Result<usize>
where
    S: ChangeSource + ?Sized,
{
    let mut decoded = 0;
    if let Some(record) = deferred.take() {
        buffer.append(&record)?;
        decoded += 1;
    }
    while !cursor.is_exhausted() && buffer.data_size() < memory_threshold {
        cancel.check()?;
        let Some(record) = source.read_next(cursor)? else {
            break;
        };
        if let SourceAction::Change(change) = &record.action {
            if change.relation == relation {
                for event in encode_change(change)? {
                    if buffer.data_size() >= memory_threshold {
                        *deferred = Some(event);
                        break;
                    }
                    buffer.append(&event)?;
                    decoded += 1;
                }
            }
        }
        if deadline_elapsed(deadline) {
            break;
        }
    }
    Ok(decoded)
}

/// Maps one source change to its encoded events, in buffer order.
fn encode_change(change: &SourceChange<'_>) -> Result<Vec<Vec<u8>>> {
    match change.action {
        ChangeAction::Insert => {
            let row = change.new_row.as_ref().ok_or_else(|| ReplayError::Decode {
                reason: "Incomplete insert info".to_string(),
            })?;
            Ok(vec![codec::encode(ChangeKind::Insert, row)?])
        }
        ChangeAction::Update => {
            let new_row = change.new_row.as_ref().ok_or_else(|| ReplayError::Decode {
                reason: "Incomplete update info".to_string(),
            })?;
            let mut events = Vec::with_capacity(2);
            if let Some(old_row) = &change.old_row {
                events.push(codec::encode(ChangeKind::UpdateOld, old_row)?);
            }
            events.push(codec::encode(ChangeKind::UpdateNew, new_row)?);
            Ok(events)
        }
        ChangeAction::Delete => {
            let row = change.old_row.as_ref().ok_or_else(|| ReplayError::Decode {
                reason: "Incomplete delete info".to_string(),
            })?;
            Ok(vec![codec::encode(ChangeKind::Delete, row)?])
        }
    }
}

/// Keeps the decoder's resource owner installed in a source for the
/// duration of a decoding window.
struct OwnerSwap<'a, S: ChangeSource + ?Sized> {
    source: &'a mut S,
    home: &'a mut Option<ResourceOwner>,
    previous: Option<ResourceOwner>,
}

impl<'a, S: ChangeSource + ?Sized> OwnerSwap<'a, S> {
    fn enter(source: &'a mut S, home: &'a mut Option<ResourceOwner>) -> Result<Self> {
        let ours = home.take().ok_or_else(|| {
            ReplayError::InvariantViolation("decoder resource owner is already installed".into())
        })?;
        source.invalidate_caches();
        let previous = source.swap_resource_owner(ours);
        Ok(Self {
            source,
            home,
            previous: Some(previous),
        })
    }

    fn source(&mut self) -> &mut S {
        self.source
    }
}

impl<S: ChangeSource + ?Sized> Drop for OwnerSwap<'_, S> {
    fn drop(&mut self) {
        self.source.invalidate_caches();
        if let Some(previous) = self.previous.take() {
            *self.home = Some(self.source.swap_resource_owner(previous));
        }
    }
}
