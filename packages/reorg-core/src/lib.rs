//! Storage primitive for the replacement table of an online rebuild.
//!
//! Provides the type system, aligned row images, the heap table with
//! command-id visibility, secondary indexes, and schema fingerprints.

pub mod config;
pub mod error;
pub mod row;
pub mod schema;
pub mod table;
pub mod types;
pub mod visibility;

pub use row::Row;
pub use table::{Location, RelationId, Table};
pub use visibility::{CommandId, VisibilityCounter};
