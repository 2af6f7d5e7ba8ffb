//! Online capture and replay of concurrent changes during a table rebuild.
//!
//! While a reorganized copy of a table is being built, writers keep
//! committing against the original. This crate taps the commit-ordered
//! change stream of the original table, buffers the relevant row changes and
//! replays them onto the replacement table until both converge.
//!
//! Components, leaf to root:
//! - [`codec`]: binary record of one captured change
//! - [`buffer`]: ordered, clearable holding area for pending changes
//! - [`index_state`]: write handles on the replacement table's indexes
//! - [`decoder`]: drains the source stream into the buffer
//! - [`apply`]: replays a drained buffer onto the replacement table
//! - [`coordinator`]: decode, check consistency, replay, repeat

pub mod apply;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod consistency;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod index_state;
pub mod interrupt;
pub mod stream;

pub use apply::{apply_concurrent_changes, PendingOldRow, ReplayStats};
pub use buffer::ChangeBuffer;
pub use codec::{ChangeEvent, ChangeKind};
pub use config::ReplayConfig;
pub use consistency::{ConsistencyChecker, ConsistencyToken, FingerprintChecker, LockMode};
pub use coordinator::{ConcurrentChanges, ProcessOutcome};
pub use decoder::DecodingState;
pub use error::{ReplayError, SchemaChanged};
pub use index_state::{IdentityKey, IndexInsertState};
pub use interrupt::CancellationFlag;
pub use stream::{ChangeSource, DecodingCursor, Lsn, MemoryChangeStream, ResourceOwner};

/// Result type for replay operations
pub type Result<T> = std::result::Result<T, ReplayError>;
