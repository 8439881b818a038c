//! # Taxis
//!
//! *τάξις: Ancient Greek for "arrangement" or "order".*
//!
//! Taxis is a typed query engine over schemaless attribute documents.
//! Every row carries a handful of first-class columns and a JSON document
//! whose keys and dtypes are declared per entity type in a side-loaded
//! registry. Taxis turns untyped client input into type-aware filters over
//! those documents.
//!
//! ## What's inside
//!
//! ### Validation
//! [`AttributeValidator`] converts raw JSON into dtype-checked values,
//! enforcing ranges, enum choices and vector dimensions.
//!
//! ### Filter compilation
//! Flat `key::value` parameters and nested `{method, operations}` trees
//! compile into a storage-agnostic [`Predicate`]. Names starting with `$`
//! address first-class columns; everything else resolves through the
//! registry.
//!
//! ### Scatter-gather
//! When a request spans several types of one kind, each filter is compiled
//! per type and the per-type subsets are unioned by primary key. A type
//! that cannot interpret a filter drops out of the union instead of
//! failing the request.
//!
//! ### Sections, related search, vectors
//! Folder, playlist and saved-search sections resolve to membership
//! predicates; related search filters media by their localizations and
//! states (and back); float-array attributes support distance-bounded
//! nearest-neighbour search.
//!
//! ### Bulk mutation
//! Patch, rename and delete attribute keys across every matching row, one
//! idempotent statement per key, with audit records handed to a
//! [`ChangeLog`] sink.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use taxis::{Engine, adapters::postgres::PostgresAdapter};
//!
//! let adapter = PostgresAdapter::from_pool(pool);
//! adapter.init_schema().await?;
//!
//! let engine = Engine::new(registry, Box::new(adapter));
//! let request = SearchRequest::new()
//!     .with_params(FilterParams::new().with(Operator::Contains, "$name::boat"));
//! let rows = engine.search(&Collection::new(1, EntityKind::Localization), &request).await?;
//! ```
//!
//! ## Feature flags
//!
//! | Flag       | Default | Description                 |
//! |------------|---------|-----------------------------|
//! | `postgres` | ✓       | PostgreSQL adapter via sqlx |

pub mod adapters;
pub mod attribute;
pub mod config;
pub mod entity;
pub mod error;
pub mod mutate;
pub mod query;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use serde_json::{Map, Value};
use tracing::debug;

pub use crate::adapters::{Adapter, memory::MemoryAdapter};
pub use crate::attribute::{
    AttributeTypeRegistry, AttributeTypeSpec, AttributeValidator, AttributeValue, Dtype, EntityKind,
    EntityType, GeoPos,
};
pub use crate::config::EngineConfig;
pub use crate::entity::{ArchiveState, ChangeEntry, ChangeRecord, Entity};
pub use crate::error::{Error, Result};
pub use crate::mutate::{AttributeMutation, BulkAttributeMutator, ChangeLog};
pub use crate::query::{
    Collection, CompiledSearch, FilterParams, Metric, Operator, Predicate, QueryNode, SearchRequest, Section,
    VectorQuery,
};

use crate::query::{
    Column, Comparison, Field, RelatedSearchBridge, Scalar, ScatterGatherUnionBuilder, SectionResolver,
    SortResolver, VectorSimilarityFilter, related::default_related_kinds,
};

/// The Engine is the primary interface: it compiles requests against the
/// registry and runs them through an adapter.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Taxis>,
    changelog: Option<Arc<dyn ChangeLog>>,
}

struct Taxis {
    registry: AttributeTypeRegistry,
    adapter: Box<dyn Adapter>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: AttributeTypeRegistry, adapter: Box<dyn Adapter>) -> Self {
        Self::with_config(registry, adapter, EngineConfig::default())
    }

    pub fn with_config(registry: AttributeTypeRegistry, adapter: Box<dyn Adapter>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Taxis {
                registry,
                adapter,
                config,
            }),
            changelog: None,
        }
    }

    /// Every applied mutation is reported to `changelog`.
    pub fn with_changelog(mut self, changelog: Arc<dyn ChangeLog>) -> Self {
        self.changelog = Some(changelog);
        self
    }

    pub fn registry(&self) -> &AttributeTypeRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.inner.adapter.as_ref()
    }

    // ==================== Compilation ====================

    /// Compiles a request into a predicate, ordering and page. Pure: no
    /// storage access.
    pub fn compile(&self, collection: &Collection, request: &SearchRequest) -> Result<CompiledSearch> {
        let start = Instant::now();
        let registry = &self.inner.registry;
        let union = ScatterGatherUnionBuilder::new(registry, &self.inner.config);
        union.pinned(collection)?;

        if collection.base.is_never() {
            return Ok(CompiledSearch::new(collection.kind, Predicate::Never));
        }

        let mut parts = vec![collection.scope(), union.compile_params(collection, &request.params)?];
        if let Some(node) = &request.object_search {
            parts.push(union.compile_tree(collection, node)?);
        }
        if !request.sections.is_empty() {
            parts.push(SectionResolver::new(&union).resolve_all(collection, &request.sections)?);
        }
        if let Some(node) = &request.related_search {
            parts.push(RelatedSearchBridge::new(&union).resolve(
                collection,
                default_related_kinds(collection.kind),
                node,
            )?);
        }

        let mut order = SortResolver::new(registry).resolve(collection, &request.sort_by)?;
        if let Some(vector) = &request.vector {
            let (predicate, ordering) = VectorSimilarityFilter::new(registry).compile(collection, vector)?;
            parts.push(predicate);
            order.insert(0, ordering);
        }

        let mut compiled = CompiledSearch::new(collection.kind, Predicate::all(parts));
        compiled.order = order;
        compiled.limit = request.limit.or(self.inner.config.default_limit);
        compiled.offset = request.offset;

        debug!(kind = %collection.kind, empty = compiled.is_empty(), "compiled search");
        histogram!("taxis.compile.duration_ms",
            "kind" => collection.kind.table_name()
        )
        .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(compiled)
    }

    // ==================== Reads ====================

    pub async fn search(&self, collection: &Collection, request: &SearchRequest) -> Result<Vec<Entity>> {
        let compiled = self.compile(collection, request)?;
        if compiled.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let rows = self.inner.adapter.query_entities(&compiled).await?;
        histogram!("taxis.search.duration_ms",
            "kind" => collection.kind.table_name()
        )
        .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(rows)
    }

    /// Matching rows, ignoring ordering and paging.
    pub async fn count(&self, collection: &Collection, request: &SearchRequest) -> Result<u64> {
        let compiled = self.compile(collection, request)?;
        if compiled.is_empty() {
            return Ok(0);
        }
        self.inner
            .adapter
            .count_entities(compiled.kind, &compiled.predicate)
            .await
    }

    pub async fn fetch_entity(&self, kind: EntityKind, id: i64) -> Result<Option<Entity>> {
        self.inner.adapter.fetch_entity(kind, id).await
    }

    // ==================== Single-row writes ====================

    /// Validates the full document against the entity's type and stores it.
    pub async fn create_entity(&self, mut entity: Entity) -> Result<Entity> {
        let entity_type = self.inner.registry.require(entity.entity_type)?;
        if entity_type.kind != entity.kind || entity_type.project != entity.project {
            return Err(Error::NotFound(format!(
                "{} type {} in project {}",
                entity.kind, entity.entity_type, entity.project
            )));
        }
        let values = AttributeValidator::validate_new(entity_type, &entity.attributes)?;
        entity.attributes = AttributeValidator::into_document(values);
        self.inner.adapter.insert_entity(entity).await
    }

    /// Validates an update of one row and returns the merged document with
    /// its audit record. Nothing is written.
    pub fn validate_update(
        &self,
        type_id: i64,
        entity: &Entity,
        candidate: &Map<String, Value>,
        reset_keys: &[String],
        null_keys: &[String],
    ) -> Result<(Map<String, Value>, ChangeRecord)> {
        let entity_type = self.inner.registry.require(type_id)?;
        let values = AttributeValidator::validate(entity_type, candidate, reset_keys, null_keys)?;
        let record = ChangeRecord::between(&entity.attributes, &values);
        let mut document = entity.attributes.clone();
        document.extend(AttributeValidator::into_document(values));
        Ok((document, record))
    }

    /// Validates and writes an update of one row, then returns the stored row.
    pub async fn update_entity(
        &self,
        kind: EntityKind,
        id: i64,
        candidate: &Map<String, Value>,
        reset_keys: &[String],
        null_keys: &[String],
    ) -> Result<Entity> {
        let entity = self
            .inner
            .adapter
            .fetch_entity(kind, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {}", kind, id)))?;
        let entity_type = self.inner.registry.require(entity.entity_type)?;
        let values = AttributeValidator::validate(entity_type, candidate, reset_keys, null_keys)?;
        let record = ChangeRecord::between(&entity.attributes, &values);
        let mutations = BulkAttributeMutator::patch(AttributeValidator::into_document(values), true);
        let scope = Predicate::IdIn(vec![id]);
        BulkAttributeMutator::execute(self.inner.adapter.as_ref(), kind, &scope, &mutations, None).await?;
        if let Some(changelog) = &self.changelog {
            if !record.is_empty() {
                changelog.record(kind, &[id], &record);
            }
        }
        self.inner
            .adapter
            .fetch_entity(kind, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {}", kind, id)))
    }

    // ==================== Bulk writes ====================

    /// Writes `values` to every row matching the request. Each value is
    /// validated against every type in scope that declares its key, and
    /// only rows of those types are written.
    pub async fn bulk_patch(
        &self,
        collection: &Collection,
        request: &SearchRequest,
        values: &Map<String, Value>,
        create_if_missing: bool,
    ) -> Result<u64> {
        let compiled = self.compile(collection, request)?;
        let types = self.types_in_scope(collection)?;
        let mut scoped = Vec::with_capacity(values.len());
        for (key, raw) in values {
            let mut converted: Option<Value> = None;
            let mut declaring = Vec::new();
            for entity_type in &types {
                if !entity_type.declares(key) && key != attribute::LEGACY_SECTION_ATTRIBUTE {
                    continue;
                }
                let single: Map<String, Value> = [(key.clone(), raw.clone())].into_iter().collect();
                let value = AttributeValidator::validate(entity_type, &single, &[], &[])?
                    .remove(key)
                    .map(|v| v.to_json())
                    .unwrap_or(Value::Null);
                match &converted {
                    Some(previous) if *previous != value => {
                        return Err(Error::AmbiguousType(format!(
                            "'{}' converts differently across types in scope",
                            key
                        )));
                    }
                    _ => converted = Some(value),
                }
                declaring.push(entity_type.id);
            }
            let Some(value) = converted else {
                return Err(Error::schema(key, format!("unknown attribute on {}", collection.kind)));
            };
            scoped.push((
                scope_to_types(&compiled.predicate, declaring, types.len()),
                AttributeMutation::Patch {
                    key: key.clone(),
                    value,
                    create_if_missing,
                },
            ));
        }
        BulkAttributeMutator::execute_scoped(
            self.inner.adapter.as_ref(),
            collection.kind,
            &scoped,
            self.changelog.as_ref(),
        )
        .await
    }

    /// Moves each `(from, to)` key on every matching row. Every type in
    /// scope that declares `from` must declare `to` with the same dtype,
    /// and only rows of those types are written.
    pub async fn bulk_rename(
        &self,
        collection: &Collection,
        request: &SearchRequest,
        pairs: &BTreeMap<String, String>,
        create_if_missing: bool,
    ) -> Result<u64> {
        let compiled = self.compile(collection, request)?;
        let types = self.types_in_scope(collection)?;
        let mut scoped = Vec::with_capacity(pairs.len());
        for (from, to) in pairs {
            let mut declaring = Vec::new();
            for entity_type in &types {
                let Some(dtype) = declared_dtype(entity_type, from) else {
                    continue;
                };
                match declared_dtype(entity_type, to) {
                    Some(target) if target == dtype => declaring.push(entity_type.id),
                    Some(target) => {
                        return Err(Error::schema(
                            to,
                            format!(
                                "declared as {:?} on {}, cannot hold {:?} from '{}'",
                                target, entity_type.name, dtype, from
                            ),
                        ));
                    }
                    None => {
                        return Err(Error::schema(to, format!("unknown attribute on {}", entity_type.name)));
                    }
                }
            }
            if declaring.is_empty() {
                return Err(Error::schema(from, format!("unknown attribute on {}", collection.kind)));
            }
            scoped.push((
                scope_to_types(&compiled.predicate, declaring, types.len()),
                AttributeMutation::Rename {
                    from: from.clone(),
                    to: to.clone(),
                    create_if_missing,
                },
            ));
        }
        BulkAttributeMutator::execute_scoped(
            self.inner.adapter.as_ref(),
            collection.kind,
            &scoped,
            self.changelog.as_ref(),
        )
        .await
    }

    /// Removes `keys` from every matching row.
    pub async fn bulk_delete(&self, collection: &Collection, request: &SearchRequest, keys: &[String]) -> Result<u64> {
        let compiled = self.compile(collection, request)?;
        let mutations = BulkAttributeMutator::delete(keys.iter().map(String::as_str));
        BulkAttributeMutator::execute(
            self.inner.adapter.as_ref(),
            collection.kind,
            &compiled.predicate,
            &mutations,
            self.changelog.as_ref(),
        )
        .await
    }

    fn types_in_scope(&self, collection: &Collection) -> Result<Vec<&EntityType>> {
        let union = ScatterGatherUnionBuilder::new(&self.inner.registry, &self.inner.config);
        Ok(match union.pinned(collection)? {
            Some(entity_type) => vec![entity_type],
            None => self.inner.registry.siblings(collection.project, collection.kind),
        })
    }
}

fn declared_dtype(entity_type: &EntityType, key: &str) -> Option<Dtype> {
    if key == attribute::LEGACY_SECTION_ATTRIBUTE {
        return Some(Dtype::String);
    }
    entity_type.attribute(key).map(|spec| spec.dtype)
}

/// Narrows `predicate` to rows of `declaring` unless every type in scope is listed.
fn scope_to_types(predicate: &Predicate, declaring: Vec<i64>, in_scope: usize) -> Predicate {
    if declaring.len() == in_scope {
        return predicate.clone();
    }
    Predicate::all([
        predicate.clone(),
        Predicate::compare(
            Field::Column(Column::Type),
            Comparison::In,
            Scalar::List(declaring.into_iter().map(Scalar::Int).collect()),
        ),
    ])
}
