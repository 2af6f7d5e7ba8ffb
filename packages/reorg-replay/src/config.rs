//! Replay configuration.

use reorg_core::RelationId;
use serde::{Deserialize, Serialize};

/// Configuration of one rebuild's change capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Relation whose changes are captured; changes of other relations are skipped
    pub relation_id: RelationId,
    /// Buffered bytes after which decoding pauses for a replay pass (default: 64 MiB)
    pub memory_threshold: usize,
    /// Resident bytes after which the buffer moves to a temporary file (default: 1 GiB)
    pub spill_threshold: usize,
}

impl ReplayConfig {
    /// Default configuration capturing the given relation.
    pub fn for_relation(relation_id: RelationId) -> Self {
        Self {
            relation_id,
            ..Default::default()
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            relation_id: RelationId(0),
            memory_threshold: 64 * 1024 * 1024,
            spill_threshold: 1024 * 1024 * 1024,
        }
    }
}
