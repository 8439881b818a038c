use std::fmt::Display;

use serde::{Deserialize, Serialize};

use super::Dtype;

/// Entity kinds sharing the attribute machinery. Each kind lives in its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Media,
    /// Shape annotation (box, line, dot, poly) on a media frame.
    Localization,
    /// Temporal annotation spanning one or more media.
    State,
    /// Node of a hierarchical label tree.
    Leaf,
    File,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Media,
        EntityKind::Localization,
        EntityKind::State,
        EntityKind::Leaf,
        EntityKind::File,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Media => "media",
            EntityKind::Localization => "localization",
            EntityKind::State => "state",
            EntityKind::Leaf => "leaf",
            EntityKind::File => "file",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// One attribute declaration on an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeTypeSpec {
    pub name: String,
    pub dtype: Dtype,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
    #[serde(default)]
    pub required: bool,
}

impl AttributeTypeSpec {
    pub fn new(name: impl Into<String>, dtype: Dtype) -> Self {
        Self {
            name: name.into(),
            dtype,
            default: None,
            minimum: None,
            maximum: None,
            choices: Vec::new(),
            dimensions: None,
            required: false,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Per-project schema for one kind of entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub id: i64,
    pub project: i64,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub attribute_types: Vec<AttributeTypeSpec>,
}

impl EntityType {
    pub fn new(id: i64, project: i64, kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            id,
            project,
            kind,
            name: name.into(),
            attribute_types: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, spec: AttributeTypeSpec) -> Self {
        self.attribute_types.push(spec);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeTypeSpec> {
        self.attribute_types.iter().find(|a| a.name == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }
}
