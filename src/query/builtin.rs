use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::attribute::{Dtype, EntityType, LEGACY_SECTION_ATTRIBUTE};

use super::predicate::Column;

/// Where a filterable name lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Column(Column),
    /// Inside the attribute document.
    Document,
}

/// Reserved `$`-prefixed names resolving to first-class columns, plus the
/// legacy section pseudo-attribute.
static BUILTINS: Lazy<HashMap<&'static str, (Storage, Dtype)>> = Lazy::new(|| {
    HashMap::from([
        ("$id", (Storage::Column(Column::Id), Dtype::Int)),
        ("$name", (Storage::Column(Column::Name), Dtype::String)),
        ("$type", (Storage::Column(Column::Type), Dtype::Int)),
        ("$created_datetime", (Storage::Column(Column::CreatedDatetime), Dtype::Datetime)),
        ("$modified_datetime", (Storage::Column(Column::ModifiedDatetime), Dtype::Datetime)),
        ("$archive_state", (Storage::Column(Column::ArchiveState), Dtype::Enum)),
        ("$elemental_id", (Storage::Column(Column::ElementalId), Dtype::String)),
        ("$section", (Storage::Column(Column::Section), Dtype::Int)),
        ("$frame", (Storage::Column(Column::Frame), Dtype::Int)),
        (LEGACY_SECTION_ATTRIBUTE, (Storage::Document, Dtype::String)),
    ])
});

/// A filterable name resolved against builtins or one type's declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRef {
    pub key: String,
    pub dtype: Dtype,
    pub storage: Storage,
}

impl AttributeRef {
    pub fn is_builtin(&self) -> bool {
        is_builtin(&self.key)
    }
}

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains_key(name)
}

/// Builtins win over declarations; `None` when `entity_type` does not declare `name`.
pub fn resolve(name: &str, entity_type: Option<&EntityType>) -> Option<AttributeRef> {
    if let Some((storage, dtype)) = BUILTINS.get(name) {
        return Some(AttributeRef {
            key: name.to_string(),
            dtype: *dtype,
            storage: *storage,
        });
    }
    entity_type
        .and_then(|t| t.attribute(name))
        .map(|spec| AttributeRef {
            key: spec.name.clone(),
            dtype: spec.dtype,
            storage: Storage::Document,
        })
}
