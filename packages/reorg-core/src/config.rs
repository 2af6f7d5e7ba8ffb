//! Storage configuration.

use serde::{Deserialize, Serialize};

/// Replacement-table storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Initial heap capacity in records
    pub initial_table_capacity: usize,
    /// Maximum heap size per table in bytes (default: unlimited)
    pub max_buffer_size: usize,
    /// Records reserved at a time by a bulk insert state
    pub bulk_insert_batch: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            initial_table_capacity: 1024,
            max_buffer_size: usize::MAX,
            bulk_insert_batch: 64,
        }
    }
}
