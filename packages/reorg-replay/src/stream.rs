//! Commit-ordered source of row-level changes.
//!
//! A [`ChangeSource`] hands out one record at a time. Row images it returns
//! may reference externally stored values whose chunk memory belongs to the
//! source and stays valid only until the next [`ChangeSource::read_next`];
//! the borrow on the returned [`SourceRecord`] enforces that.

use std::fmt;

use reorg_core::RelationId;
use serde::{Deserialize, Serialize};

use crate::error::ReplayError;

/// Position in the source stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Position right after this one.
    pub fn next(self) -> Lsn {
        Lsn(self.0.saturating_add(1))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xFFFF_FFFF)
    }
}

/// Read position plus the bound decoding never passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodingCursor {
    position: Lsn,
    end: Lsn,
}

impl DecodingCursor {
    pub fn new(start: Lsn, end: Lsn) -> Self {
        Self {
            position: start,
            end,
        }
    }

    /// Position of the next record to read.
    pub fn position(&self) -> Lsn {
        self.position
    }

    /// End bound (exclusive).
    pub fn end(&self) -> Lsn {
        self.end
    }

    /// Returns whether the cursor reached its end bound.
    pub fn is_exhausted(&self) -> bool {
        self.position >= self.end
    }

    /// Moves the read position forward; never backwards.
    pub fn advance_to(&mut self, position: Lsn) {
        self.position = self.position.max(position);
    }

    /// Extends the end bound, e.g. after more changes were committed.
    pub fn extend_to(&mut self, end: Lsn) {
        self.end = self.end.max(end);
    }
}

/// Scope that owns resources a source acquires while reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOwner {
    name: String,
}

impl ResourceOwner {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Row-level action of a source change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

/// Value stored outside its row image, delivered as transient chunks.
#[derive(Debug, Clone)]
pub struct ExternalValue<'a> {
    offset: usize,
    len: usize,
    chunks: Vec<&'a [u8]>,
}

impl<'a> ExternalValue<'a> {
    /// Value belonging to the field range `offset..offset + len`.
    pub fn new(offset: usize, len: usize, chunks: Vec<&'a [u8]>) -> Self {
        Self {
            offset,
            len,
            chunks,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Declared size of the field range.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunks(&self) -> &[&'a [u8]] {
        &self.chunks
    }

    /// Total bytes held by the chunks.
    pub fn stored_len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }
}

/// Row image as delivered by a source.
#[derive(Debug, Clone)]
pub struct SourceRow<'a> {
    image: &'a [u8],
    external: Vec<ExternalValue<'a>>,
}

impl<'a> SourceRow<'a> {
    /// Self-contained row image.
    pub fn new(image: &'a [u8]) -> Self {
        Self {
            image,
            external: Vec::new(),
        }
    }

    /// Row image whose listed field ranges hold externally stored values.
    pub fn with_external(image: &'a [u8], external: Vec<ExternalValue<'a>>) -> Self {
        Self { image, external }
    }

    pub fn image(&self) -> &'a [u8] {
        self.image
    }

    pub fn external(&self) -> &[ExternalValue<'a>] {
        &self.external
    }

    pub fn has_external(&self) -> bool {
        !self.external.is_empty()
    }
}

/// Committed row change of one relation.
#[derive(Debug, Clone)]
pub struct SourceChange<'a> {
    pub relation: RelationId,
    pub action: ChangeAction,
    /// Row before the change (delete, or update that changed the identity key)
    pub old_row: Option<SourceRow<'a>>,
    /// Row after the change (insert, update)
    pub new_row: Option<SourceRow<'a>>,
}

/// Payload of one source record.
#[derive(Debug, Clone)]
pub enum SourceAction<'a> {
    Begin,
    Change(SourceChange<'a>),
    Commit,
    /// Any other marker; carries no row change.
    Message,
}

/// One record read from a source.
#[derive(Debug, Clone)]
pub struct SourceRecord<'a> {
    pub lsn: Lsn,
    pub action: SourceAction<'a>,
}

/// Commit-ordered stream of changes delivered exactly once each.
pub trait ChangeSource {
    /// Reads the record at the cursor and moves the cursor past it.
    ///
    /// Returns `Ok(None)` once the cursor reached its end bound. The returned
    /// record borrows source memory that the next call may reuse.
    fn read_next(
        &mut self,
        cursor: &mut DecodingCursor,
    ) -> Result<Option<SourceRecord<'_>>, ReplayError>;

    /// Tells the source that everything before `lsn` has been consumed.
    fn confirm_progress(&mut self, lsn: Lsn);

    /// Drops cached schema state before and after a decoding window.
    fn invalidate_caches(&mut self);

    /// Installs `owner` for resources acquired by subsequent reads and
    /// returns the previously installed owner.
    fn swap_resource_owner(&mut self, owner: ResourceOwner) -> ResourceOwner;
}

/// Default size of the chunks external values are split into.
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

/// Row image held by a [`MemoryChangeStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRow {
    image: Vec<u8>,
    external: Vec<StoredValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredValue {
    offset: usize,
    len: usize,
    value: Vec<u8>,
}

impl StreamRow {
    pub fn new(image: impl Into<Vec<u8>>) -> Self {
        Self {
            image: image.into(),
            external: Vec::new(),
        }
    }

    /// Stores `value` out of line for the field range `offset..offset + len`.
    /// The image bytes in that range are left as they are.
    pub fn with_external(mut self, offset: usize, len: usize, value: impl Into<Vec<u8>>) -> Self {
        self.external.push(StoredValue {
            offset,
            len,
            value: value.into(),
        });
        self
    }

    fn as_source<'a, I>(&'a self, chunks: &'a [Vec<u8>], spans: &mut I) -> SourceRow<'a>
    where
        I: Iterator<Item = (usize, usize)>,
    {
        let external = self
            .external
            .iter()
            .map(|stored| {
                let (start, end) = spans.next().unwrap_or_default();
                let pieces = chunks[start..end].iter().map(Vec::as_slice).collect();
                ExternalValue::new(stored.offset, stored.len, pieces)
            })
            .collect();
        SourceRow::with_external(&self.image, external)
    }
}

#[derive(Debug, Clone)]
enum StreamEntry {
    Begin,
    Commit,
    Message,
    Change {
        relation: RelationId,
        action: ChangeAction,
        old: Option<StreamRow>,
        new: Option<StreamRow>,
    },
}

/// In-memory commit-ordered change stream.
///
/// Record positions are entry indices. External values are split into
/// chunks that are rebuilt on every read and freed on the next one.
#[derive(Debug)]
pub struct MemoryChangeStream {
    entries: Vec<StreamEntry>,
    chunk_size: usize,
    chunks: Vec<Vec<u8>>,
    owner: ResourceOwner,
    last_read_owner: Option<ResourceOwner>,
    confirmed: Option<Lsn>,
    cache_invalidations: u64,
    reads: u64,
}

impl Default for MemoryChangeStream {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChangeStream {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            chunk_size: chunk_size.max(1),
            chunks: Vec::new(),
            owner: ResourceOwner::new("top-level"),
            last_read_owner: None,
            confirmed: None,
            cache_invalidations: 0,
            reads: 0,
        }
    }

    fn push(&mut self, entry: StreamEntry) -> Lsn {
        let lsn = Lsn(self.entries.len() as u64);
        self.entries.push(entry);
        lsn
    }

    pub fn begin(&mut self) -> Lsn {
        self.push(StreamEntry::Begin)
    }

    pub fn commit(&mut self) -> Lsn {
        self.push(StreamEntry::Commit)
    }

    pub fn message(&mut self) -> Lsn {
        self.push(StreamEntry::Message)
    }

    /// Appends a raw change, including malformed ones missing a row image.
    pub fn push_change(
        &mut self,
        relation: RelationId,
        action: ChangeAction,
        old: Option<StreamRow>,
        new: Option<StreamRow>,
    ) -> Lsn {
        self.push(StreamEntry::Change {
            relation,
            action,
            old,
            new,
        })
    }

    pub fn insert(&mut self, relation: RelationId, row: StreamRow) -> Lsn {
        self.push_change(relation, ChangeAction::Insert, None, Some(row))
    }

    /// Appends an update. `old` is only given when the identity key changed.
    pub fn update(&mut self, relation: RelationId, old: Option<StreamRow>, new: StreamRow) -> Lsn {
        self.push_change(relation, ChangeAction::Update, old, Some(new))
    }

    pub fn delete(&mut self, relation: RelationId, old: StreamRow) -> Lsn {
        self.push_change(relation, ChangeAction::Delete, Some(old), None)
    }

    /// Position right after the last record.
    pub fn end_lsn(&self) -> Lsn {
        Lsn(self.entries.len() as u64)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest position confirmed as consumed.
    pub fn confirmed(&self) -> Option<Lsn> {
        self.confirmed
    }

    pub fn cache_invalidations(&self) -> u64 {
        self.cache_invalidations
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Currently installed resource owner.
    pub fn resource_owner(&self) -> &ResourceOwner {
        &self.owner
    }

    /// Resource owner that was installed during the most recent read.
    pub fn last_read_owner(&self) -> Option<&ResourceOwner> {
        self.last_read_owner.as_ref()
    }
}

impl ChangeSource for MemoryChangeStream {
    fn read_next(
        &mut self,
        cursor: &mut DecodingCursor,
    ) -> Result<Option<SourceRecord<'_>>, ReplayError> {
        if cursor.is_exhausted() {
            return Ok(None);
        }

        let lsn = cursor.position();
        let index = usize::try_from(lsn.0)
            .ok()
            .filter(|i| *i < self.entries.len())
            .ok_or_else(|| ReplayError::Decode {
                reason: format!("no record at {} (stream ends at {})", lsn, self.end_lsn()),
            })?;
        cursor.advance_to(lsn.next());
        self.reads += 1;
        self.last_read_owner = Some(self.owner.clone());

        // Chunks of the previous record are released here.
        self.chunks.clear();
        let mut spans = Vec::new();
        if let StreamEntry::Change { old, new, .. } = &self.entries[index] {
            for row in old.iter().chain(new.iter()) {
                for stored in &row.external {
                    let start = self.chunks.len();
                    self.chunks
                        .extend(stored.value.chunks(self.chunk_size).map(<[u8]>::to_vec));
                    spans.push((start, self.chunks.len()));
                }
            }
        }

        let chunks = &self.chunks;
        let mut spans = spans.into_iter();
        let action = match &self.entries[index] {
            StreamEntry::Begin => SourceAction::Begin,
            StreamEntry::Commit => SourceAction::Commit,
            StreamEntry::Message => SourceAction::Message,
            StreamEntry::Change {
                relation,
                action,
                old,
                new,
            } => {
                let old_row = old.as_ref().map(|row| row.as_source(chunks, &mut spans));
                let new_row = new.as_ref().map(|row| row.as_source(chunks, &mut spans));
                SourceAction::Change(SourceChange {
                    relation: *relation,
                    action: *action,
                    old_row,
                    new_row,
                })
            }
        };

        Ok(Some(SourceRecord { lsn, action }))
    }

    fn confirm_progress(&mut self, lsn: Lsn) {
        self.confirmed = Some(self.confirmed.map_or(lsn, |c| c.max(lsn)));
    }

    fn invalidate_caches(&mut self) {
        self.cache_invalidations += 1;
    }

    fn swap_resource_owner(&mut self, owner: ResourceOwner) -> ResourceOwner {
        std::mem::replace(&mut self.owner, owner)
    }
}
