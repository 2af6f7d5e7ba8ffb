//! Command ids and the visibility counter consulted by heap scans.
//!
//! Every heap write is stamped with the command id current at the time.
//! A scan only sees writes stamped strictly below its snapshot marker, so a
//! change becomes visible to later lookups once the counter is advanced.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonically increasing command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommandId(pub u32);

impl CommandId {
    /// Stamp used for rows loaded before any replay; visible to every snapshot.
    pub const FROZEN: CommandId = CommandId(0);

    /// Returns the following command id.
    pub fn next(self) -> CommandId {
        CommandId(self.0.saturating_add(1))
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command counter plus the active snapshot's as-of marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityCounter {
    current: CommandId,
    snapshot: CommandId,
    advances: u64,
}

impl VisibilityCounter {
    /// Starts counting right after the last command already applied to a table.
    pub fn starting_after(last: CommandId) -> Self {
        let current = last.next();
        Self {
            current,
            snapshot: current,
            advances: 0,
        }
    }

    /// Command id to stamp the next write with.
    pub fn current(&self) -> CommandId {
        self.current
    }

    /// Snapshot marker for lookups: writes stamped below it are visible.
    pub fn snapshot(&self) -> CommandId {
        self.snapshot
    }

    /// Number of times the counter was advanced.
    pub fn advances(&self) -> u64 {
        self.advances
    }

    /// Increments the command counter and moves the snapshot marker with it.
    pub fn advance(&mut self) {
        self.current = self.current.next();
        self.snapshot = self.current;
        self.advances += 1;
    }
}
