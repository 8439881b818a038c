use crate::attribute::EntityKind;
use crate::error::{Error, Result};

use super::Collection;
use super::compile::Coverage;
use super::predicate::Predicate;
use super::tree::QueryNode;
use super::union::ScatterGatherUnionBuilder;

/// Which end of a relation holds the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Primary,
    Related,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    /// `localization.media` references the parent media row.
    MediaForeignKey { localization: Side },
    /// `state_media(state, media)` junction.
    StateMedia { state: Side },
}

impl Link {
    /// The side whose `media` list carries the link.
    pub fn holder(&self) -> Side {
        match self {
            Link::MediaForeignKey { localization } => *localization,
            Link::StateMedia { state } => *state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relation {
    pub primary: EntityKind,
    pub related: EntityKind,
    pub link: Link,
}

impl Relation {
    pub fn between(primary: EntityKind, related: EntityKind) -> Result<Self> {
        use EntityKind::*;
        let link = match (primary, related) {
            (Media, Localization) => Link::MediaForeignKey {
                localization: Side::Related,
            },
            (Localization, Media) => Link::MediaForeignKey {
                localization: Side::Primary,
            },
            (Media, State) => Link::StateMedia { state: Side::Related },
            (State, Media) => Link::StateMedia { state: Side::Primary },
            _ => {
                return Err(Error::schema(
                    primary.to_string(),
                    format!("no relationship between {} and {}", primary, related),
                ));
            }
        };
        Ok(Self {
            primary,
            related,
            link,
        })
    }
}

pub fn default_related_kinds(kind: EntityKind) -> &'static [EntityKind] {
    match kind {
        EntityKind::Media => &[EntityKind::Localization, EntityKind::State],
        EntityKind::Localization | EntityKind::State => &[EntityKind::Media],
        EntityKind::Leaf | EntityKind::File => &[],
    }
}

/// Filters a primary collection by a query over related kinds.
pub struct RelatedSearchBridge<'a> {
    union: &'a ScatterGatherUnionBuilder<'a>,
}

impl<'a> RelatedSearchBridge<'a> {
    pub fn new(union: &'a ScatterGatherUnionBuilder<'a>) -> Self {
        Self { union }
    }

    /// Primary rows linked to at least one related row matching `query`.
    /// A name must be declared by some type of some related kind.
    pub fn resolve(
        &self,
        collection: &Collection,
        related_kinds: &[EntityKind],
        query: &QueryNode,
    ) -> Result<Predicate> {
        if collection.base.is_never() {
            return Ok(Predicate::Never);
        }
        if related_kinds.is_empty() {
            return Err(Error::schema(
                collection.kind.to_string(),
                format!("{} has no related kinds", collection.kind),
            ));
        }
        let mut coverage = Coverage::default();
        let mut members = Vec::with_capacity(related_kinds.len());
        for related in related_kinds {
            let relation = Relation::between(collection.kind, *related)?;
            let scope = Collection::new(collection.project, *related);
            let predicate = self.union.scatter_tree(&scope, query, &mut coverage)?;
            if predicate.is_never() {
                continue;
            }
            members.push(Predicate::Related {
                relation,
                predicate: Box::new(predicate),
            });
        }
        coverage.finish()?;
        Ok(Predicate::any(members))
    }
}
