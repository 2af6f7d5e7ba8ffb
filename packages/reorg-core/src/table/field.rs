//! Column definition within a table.

use crate::types::TypeLayout;

use super::validation::align_offset;

/// Column definition within a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    /// Field name
    pub name: String,
    /// Byte offset within record
    pub offset: usize,
    /// Type identifier (e.g., "u64", "string")
    pub type_id: String,
    /// Field size in bytes (derived from type layout)
    pub size: usize,
    /// Field alignment requirement (derived from type layout)
    pub align: usize,
    /// Whether the column bytes compare without decoding
    pub pod: bool,
}

impl Field {
    /// Creates a field at an explicit offset.
    pub fn new(name: impl Into<String>, layout: &TypeLayout, offset: usize) -> Self {
        Self {
            name: name.into(),
            offset,
            type_id: layout.type_id.clone(),
            size: layout.size,
            align: layout.align,
            pod: layout.pod,
        }
    }

    /// Lays out columns in declaration order, padding each to its alignment.
    pub fn sequence<'a, I>(columns: I) -> Vec<Field>
    where
        I: IntoIterator<Item = (&'a str, &'a TypeLayout)>,
    {
        let mut offset = 0;
        let mut fields = Vec::new();
        for (name, layout) in columns {
            offset = align_offset(offset, layout.align);
            fields.push(Field::new(name, layout, offset));
            offset += layout.size;
        }
        fields
    }

    /// Returns the end offset of this field (offset + size).
    pub fn end_offset(&self) -> usize {
        self.offset + self.size
    }
}
