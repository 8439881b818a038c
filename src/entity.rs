use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::attribute::{AttributeValue, EntityKind, EntityType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveState {
    #[default]
    Live,
    ToArchive,
    Archived,
    ToLive,
}

impl ArchiveState {
    pub const CHOICES: [&'static str; 4] = ["live", "to_archive", "archived", "to_live"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveState::Live => "live",
            ArchiveState::ToArchive => "to_archive",
            ArchiveState::Archived => "archived",
            ArchiveState::ToLive => "to_live",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "live" => Some(ArchiveState::Live),
            "to_archive" => Some(ArchiveState::ToArchive),
            "archived" => Some(ArchiveState::Archived),
            "to_live" => Some(ArchiveState::ToLive),
            _ => None,
        }
    }
}

impl Display for ArchiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of any kind: first-class columns plus the schemaless attribute document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub project: i64,
    pub kind: EntityKind,
    pub entity_type: i64,
    pub name: String,
    pub created_datetime: DateTime<Utc>,
    pub modified_datetime: DateTime<Utc>,
    pub archive_state: ArchiveState,
    pub elemental_id: Uuid,
    /// Primary (folder) section.
    pub section: Option<i64>,
    pub frame: Option<i64>,
    /// Parent media of a localization, or the media set of a state.
    pub media: Vec<i64>,
    pub attributes: Map<String, Value>,
}

impl Entity {
    /// A fresh, unsaved entity of `entity_type`. The adapter assigns `id`.
    pub fn new(entity_type: &EntityType, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            project: entity_type.project,
            kind: entity_type.kind,
            entity_type: entity_type.id,
            name: name.into(),
            created_datetime: now,
            modified_datetime: now,
            archive_state: ArchiveState::Live,
            elemental_id: Uuid::now_v7(),
            section: None,
            frame: None,
            media: Vec::new(),
            attributes: Map::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_media(mut self, media: impl IntoIterator<Item = i64>) -> Self {
        self.media = media.into_iter().collect();
        self
    }

    pub fn in_section(mut self, section: i64) -> Self {
        self.section = Some(section);
        self
    }

    pub fn at_frame(mut self, frame: i64) -> Self {
        self.frame = Some(frame);
        self
    }

    pub fn with_archive_state(mut self, state: ArchiveState) -> Self {
        self.archive_state = state;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_datetime = at;
        self.modified_datetime = at;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub name: String,
    pub value: Value,
}

/// Audit record of one attribute mutation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub old: Vec<ChangeEntry>,
    pub new: Vec<ChangeEntry>,
}

impl ChangeRecord {
    /// Single-row update: previous values are read from the current document.
    pub fn between(previous: &Map<String, Value>, updated: &BTreeMap<String, AttributeValue>) -> Self {
        let mut record = ChangeRecord::default();
        for (name, value) in updated {
            record.old.push(ChangeEntry {
                name: name.clone(),
                value: previous.get(name).cloned().unwrap_or(Value::Null),
            });
            record.new.push(ChangeEntry {
                name: name.clone(),
                value: value.to_json(),
            });
        }
        record
    }

    pub fn is_empty(&self) -> bool {
        self.old.is_empty() && self.new.is_empty()
    }
}
