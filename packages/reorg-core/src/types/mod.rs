//! Column type layouts and the type registry.

use std::collections::HashMap;
use std::sync::RwLock;

mod builtin_types;
mod error;
mod type_layout;

pub use builtin_types::{
    decode_string, encode_string, register_builtin_types, BLOB_FIELD_SIZE, STRING_FIELD_SIZE,
};
pub use error::TypeError;
pub use type_layout::TypeLayout;

/// Registry for type layouts.
///
/// Stores registered types with lookup by type identifier.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, TypeLayout>>,
}

impl TypeRegistry {
    /// Creates a new empty type registry.
    pub fn new() -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry pre-populated with the builtin types.
    pub fn with_builtins() -> Result<Self, TypeError> {
        let registry = Self::new();
        register_builtin_types(&registry)?;
        Ok(registry)
    }

    /// Registers a type layout.
    ///
    /// # Returns
    /// `Ok(())` if successful, `Err(TypeError)` if type already registered or invalid.
    pub fn register(&self, layout: TypeLayout) -> Result<(), TypeError> {
        layout.validate()?;

        let mut types = self.types.write().map_err(|_| TypeError::LockPoisoned)?;
        if types.contains_key(&layout.type_id) {
            return Err(TypeError::AlreadyRegistered {
                type_id: layout.type_id.clone(),
            });
        }

        types.insert(layout.type_id.clone(), layout);
        Ok(())
    }

    /// Retrieves a type layout by identifier.
    pub fn get(&self, type_id: &str) -> Option<TypeLayout> {
        let types = self.types.read().ok()?;
        types.get(type_id).cloned()
    }

    /// Retrieves a type layout, failing with `TypeError::NotFound`.
    pub fn require(&self, type_id: &str) -> Result<TypeLayout, TypeError> {
        self.get(type_id).ok_or_else(|| TypeError::NotFound {
            type_id: type_id.to_string(),
        })
    }

    /// Checks if a type is registered.
    pub fn contains(&self, type_id: &str) -> bool {
        match self.types.read() {
            Ok(types) => types.contains_key(type_id),
            Err(_) => false,
        }
    }
}
