use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::Collection;
use super::predicate::{Column, Predicate, Scalar};
use super::related::{RelatedSearchBridge, default_related_kinds};
use super::tree::QueryNode;
use super::union::ScatterGatherUnionBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Membership through the `section` column.
    Folder,
    /// Explicit media list.
    Playlist,
    /// Membership by stored query.
    SavedSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: i64,
    pub project: i64,
    pub name: String,
    pub dtype: SectionKind,
    #[serde(default)]
    pub object_search: Option<QueryNode>,
    #[serde(default)]
    pub related_object_search: Option<QueryNode>,
    #[serde(default)]
    pub media_set: Vec<i64>,
}

impl Section {
    pub fn folder(id: i64, project: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            project,
            name: name.into(),
            dtype: SectionKind::Folder,
            object_search: None,
            related_object_search: None,
            media_set: Vec::new(),
        }
    }

    pub fn playlist(id: i64, project: i64, name: impl Into<String>, media: impl IntoIterator<Item = i64>) -> Self {
        Self {
            dtype: SectionKind::Playlist,
            media_set: media.into_iter().collect(),
            ..Self::folder(id, project, name)
        }
    }

    pub fn saved_search(
        id: i64,
        project: i64,
        name: impl Into<String>,
        object_search: Option<QueryNode>,
        related_object_search: Option<QueryNode>,
    ) -> Self {
        Self {
            dtype: SectionKind::SavedSearch,
            object_search,
            related_object_search,
            ..Self::folder(id, project, name)
        }
    }
}

/// Section membership as a predicate on the primary kind.
pub struct SectionResolver<'a> {
    union: &'a ScatterGatherUnionBuilder<'a>,
}

impl<'a> SectionResolver<'a> {
    pub fn new(union: &'a ScatterGatherUnionBuilder<'a>) -> Self {
        Self { union }
    }

    pub fn resolve(&self, collection: &Collection, section: &Section) -> Result<Predicate> {
        if collection.base.is_never() {
            return Ok(Predicate::Never);
        }
        match section.dtype {
            SectionKind::Folder => Ok(Predicate::column_eq(Column::Section, Scalar::Int(section.id))),
            SectionKind::Playlist if section.media_set.is_empty() => Ok(Predicate::Never),
            SectionKind::Playlist => Ok(Predicate::IdIn(section.media_set.clone())),
            SectionKind::SavedSearch => match (&section.object_search, &section.related_object_search) {
                (Some(object_search), _) => self.union.compile_tree(collection, object_search),
                (None, Some(related)) => RelatedSearchBridge::new(self.union).resolve(
                    collection,
                    default_related_kinds(collection.kind),
                    related,
                ),
                (None, None) => Ok(Predicate::Never),
            },
        }
    }

    /// Union of memberships. Empty members drop out; all empty is Never.
    pub fn resolve_all(&self, collection: &Collection, sections: &[Section]) -> Result<Predicate> {
        let mut members = Vec::with_capacity(sections.len());
        for section in sections {
            members.push(self.resolve(collection, section)?);
        }
        Ok(Predicate::any(members))
    }
}
