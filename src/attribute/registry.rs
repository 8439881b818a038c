use std::collections::{BTreeMap, HashSet};

use super::{EntityKind, EntityType};
use crate::error::{Error, Result};

/// Side-loaded schema registry: every declared entity type, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct AttributeTypeRegistry {
    types: BTreeMap<i64, EntityType>,
}

impl AttributeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_types(types: impl IntoIterator<Item = EntityType>) -> Result<Self> {
        let mut registry = Self::new();
        for entity_type in types {
            registry.register(entity_type)?;
        }
        Ok(registry)
    }

    /// Adds or replaces a type. Attribute names must be unique within it.
    pub fn register(&mut self, entity_type: EntityType) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &entity_type.attribute_types {
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::schema(
                    &spec.name,
                    format!("declared twice on type {}", entity_type.id),
                ));
            }
            if spec.name.starts_with('$') {
                return Err(Error::schema(
                    &spec.name,
                    "the '$' prefix is reserved for built-in columns",
                ));
            }
        }
        self.types.insert(entity_type.id, entity_type);
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<&EntityType> {
        self.types.get(&id)
    }

    pub fn require(&self, id: i64) -> Result<&EntityType> {
        self.get(id)
            .ok_or_else(|| Error::NotFound(format!("entity type {}", id)))
    }

    /// Every type of `kind` in `project`, ordered by id.
    pub fn siblings(&self, project: i64, kind: EntityKind) -> Vec<&EntityType> {
        self.types
            .values()
            .filter(|t| t.project == project && t.kind == kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
