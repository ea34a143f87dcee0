//! Entity-type descriptors.
//!
//! Replaces a deep cache-manager inheritance hierarchy with a flat
//! registry: the [`UnifiedEntityStore`](crate::store::UnifiedEntityStore)
//! and [`SqlExecutor`](crate::executor::SqlExecutor) both resolve
//! `{id, primary_key_field, table_name}` through here instead of holding
//! per-type subclasses or hardcoding a `"id"` convention.

use std::collections::HashMap;

/// Static metadata for one entity type (≈ one table).
#[derive(Debug, Clone)]
pub struct EntityTypeDescriptor {
    /// Logical entity-type identifier, as carried in `Entry::table`.
    pub id: String,
    /// Name of the field within an entry's data map that holds the
    /// primary key.
    pub primary_key_field: String,
    /// Physical table name the executor applies mutations against.
    pub table_name: String,
}

impl EntityTypeDescriptor {
    /// Convenience constructor for the common case of `table_name == id`.
    pub fn new(id: impl Into<String>, primary_key_field: impl Into<String>) -> Self {
        let id = id.into();
        EntityTypeDescriptor {
            table_name: id.clone(),
            id,
            primary_key_field: primary_key_field.into(),
        }
    }
}

/// Registry of known entity types, consulted for primary-key resolution
/// and store capacity auto-distribution.
#[derive(Debug, Clone, Default)]
pub struct EntityTypeRegistry {
    descriptors: HashMap<String, EntityTypeDescriptor>,
}

impl EntityTypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        EntityTypeRegistry {
            descriptors: HashMap::new(),
        }
    }

    /// Registers (or replaces) the descriptor for an entity type.
    pub fn register(&mut self, descriptor: EntityTypeDescriptor) {
        self.descriptors.insert(descriptor.id.clone(), descriptor);
    }

    /// Looks up the descriptor for `entity_type`.
    pub fn get(&self, entity_type: &str) -> Option<&EntityTypeDescriptor> {
        self.descriptors.get(entity_type)
    }

    /// Iterates over every registered entity type.
    pub fn iter(&self) -> impl Iterator<Item = &EntityTypeDescriptor> {
        self.descriptors.values()
    }

    /// Number of registered entity types.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_resolve() {
        let mut registry = EntityTypeRegistry::new();
        registry.register(EntityTypeDescriptor::new("customer", "id"));
        registry.register(EntityTypeDescriptor {
            id: "package_account_reserve".to_string(),
            primary_key_field: "reserveId".to_string(),
            table_name: "package_account_reserve".to_string(),
        });

        assert_eq!(registry.get("customer").unwrap().primary_key_field, "id");
        assert_eq!(
            registry.get("package_account_reserve").unwrap().primary_key_field,
            "reserveId"
        );
        assert!(registry.get("unknown").is_none());
    }
}
