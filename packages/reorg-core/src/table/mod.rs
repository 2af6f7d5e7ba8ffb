//! Table schema, field definitions, heap slots and secondary indexes.

mod field;
mod index;
#[allow(clippy::module_inception)]
mod table;
pub(crate) mod validation;

pub use field::Field;
pub use index::{Index, IndexDef, IndexHandle, IndexId, KeyColumn};
pub use table::{BulkInsertState, Location, RelationId, Table};
