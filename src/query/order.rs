use crate::attribute::AttributeTypeRegistry;
use crate::error::{Error, Result};

use super::Collection;
use super::builtin::{AttributeRef, Storage, resolve};
use super::predicate::{Field, OrderBy, View};
use super::project::TypeCastProjector;

/// Resolves `[-]name` sort keys to typed orderings.
pub struct SortResolver<'a> {
    registry: &'a AttributeTypeRegistry,
}

impl<'a> SortResolver<'a> {
    pub fn new(registry: &'a AttributeTypeRegistry) -> Self {
        Self { registry }
    }

    pub fn resolve(&self, collection: &Collection, sort_by: &[String]) -> Result<Vec<OrderBy>> {
        sort_by
            .iter()
            .map(|key| {
                let (name, descending) = match key.strip_prefix('-') {
                    Some(name) => (name, true),
                    None => (key.as_str(), false),
                };
                Ok(OrderBy::Field {
                    field: self.field(collection, name)?,
                    descending,
                })
            })
            .collect()
    }

    fn field(&self, collection: &Collection, name: &str) -> Result<Field> {
        let pinned = match collection.entity_type {
            Some(id) => Some(self.registry.require(id)?),
            None => None,
        };
        if let Some(attribute) = resolve(name, pinned) {
            return sortable(&attribute);
        }
        if pinned.is_some() {
            return Err(Error::schema(name, "unknown attribute"));
        }
        // Unpinned: siblings agreeing on a view sort on it, otherwise on text.
        let mut views = Vec::new();
        for sibling in self.registry.siblings(collection.project, collection.kind) {
            if let Some(attribute) = resolve(name, Some(sibling)) {
                match sortable(&attribute)? {
                    Field::Attribute { view, .. } => views.push(view),
                    column => return Ok(column),
                }
            }
        }
        let Some(first) = views.first().copied() else {
            return Err(Error::schema(name, "unknown attribute"));
        };
        let view = if views.iter().all(|v| *v == first) { first } else { View::Text };
        Ok(Field::Attribute {
            key: name.to_string(),
            view,
        })
    }
}

fn sortable(attribute: &AttributeRef) -> Result<Field> {
    match attribute.storage {
        Storage::Column(column) => Ok(Field::Column(column)),
        Storage::Document => TypeCastProjector::field(attribute)
            .map_err(|_| Error::schema(&attribute.key, format!("cannot sort on dtype '{}'", attribute.dtype))),
    }
}
