pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;

use crate::{
    attribute::EntityKind,
    entity::Entity,
    error::Error,
    mutate::AttributeMutation,
    query::{CompiledSearch, Predicate},
};

/// -----------------------------
/// Adapter contract
/// -----------------------------
///
/// An adapter stores entities of every kind and evaluates compiled
/// predicates against them. Predicates arrive fully resolved: attribute
/// names, typed views and sibling subsets are decided before the adapter
/// sees them.
#[async_trait]
pub trait Adapter: Send + Sync + 'static {
    /// Stores a new entity and returns it with its assigned id.
    async fn insert_entity(&self, entity: Entity) -> Result<Entity, Error>;

    async fn fetch_entity(&self, kind: EntityKind, id: i64) -> Result<Option<Entity>, Error>;

    /// Rows matching `search.predicate`, ordered, then paged.
    async fn query_entities(&self, search: &CompiledSearch) -> Result<Vec<Entity>, Error>;

    async fn count_entities(&self, kind: EntityKind, predicate: &Predicate) -> Result<u64, Error>;

    /// Applies one mutation to every row of `kind` matching `scope` and
    /// returns the ids of affected rows.
    async fn apply_mutation(
        &self,
        kind: EntityKind,
        scope: &Predicate,
        mutation: &AttributeMutation,
    ) -> Result<Vec<i64>, Error>;
}
