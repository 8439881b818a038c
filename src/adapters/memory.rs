use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use crate::{
    adapters::Adapter,
    attribute::EntityKind,
    entity::Entity,
    error::Error,
    mutate::AttributeMutation,
    query::{
        CompiledSearch, Comparison, Field, OrderBy, Predicate, Scalar, TypeCastProjector, View,
        related::Side,
    },
};

type Tables = HashMap<EntityKind, BTreeMap<i64, Entity>>;

#[derive(Clone, Default)]
struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    next_id: Arc<Mutex<i64>>,
}

impl MemoryStore {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, Error> {
        self.tables
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))
    }

    fn allocate_id(&self) -> Result<i64, Error> {
        let mut next = self
            .next_id
            .lock()
            .map_err(|e| Error::Storage(e.to_string()))?;
        *next += 1;
        Ok(*next)
    }
}

/// In-process adapter evaluating predicates over typed projections of the
/// stored documents. Used by tests and embedders that need no database.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    store: MemoryStore,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn insert_entity(&self, mut entity: Entity) -> Result<Entity, Error> {
        entity.id = self.store.allocate_id()?;
        let mut tables = self.store.tables()?;
        tables
            .entry(entity.kind)
            .or_default()
            .insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn fetch_entity(&self, kind: EntityKind, id: i64) -> Result<Option<Entity>, Error> {
        let tables = self.store.tables()?;
        Ok(tables.get(&kind).and_then(|rows| rows.get(&id)).cloned())
    }

    async fn query_entities(&self, search: &CompiledSearch) -> Result<Vec<Entity>, Error> {
        let tables = self.store.tables()?;
        let Some(rows) = tables.get(&search.kind) else {
            return Ok(Vec::new());
        };
        let mut keyed: Vec<(Vec<Option<Scalar>>, &Entity)> = rows
            .values()
            .filter(|entity| evaluate(&tables, entity, &search.predicate))
            .map(|entity| (search.order.iter().map(|o| sort_value(entity, o)).collect(), entity))
            .collect();
        keyed.sort_by(|(a, left), (b, right)| {
            for ((x, y), order) in a.iter().zip(b).zip(&search.order) {
                let ordering = compare_sort_values(x, y, descending(order));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            left.id.cmp(&right.id)
        });
        let offset = search.offset.unwrap_or(0) as usize;
        let limit = search.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(keyed
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, entity)| entity.clone())
            .collect())
    }

    async fn count_entities(&self, kind: EntityKind, predicate: &Predicate) -> Result<u64, Error> {
        let tables = self.store.tables()?;
        Ok(tables
            .get(&kind)
            .map(|rows| rows.values().filter(|e| evaluate(&tables, e, predicate)).count() as u64)
            .unwrap_or(0))
    }

    async fn apply_mutation(
        &self,
        kind: EntityKind,
        scope: &Predicate,
        mutation: &AttributeMutation,
    ) -> Result<Vec<i64>, Error> {
        let mut tables = self.store.tables()?;
        let matching: Vec<i64> = match tables.get(&kind) {
            Some(rows) => rows
                .values()
                .filter(|e| evaluate(&tables, e, scope))
                .map(|e| e.id)
                .collect(),
            None => return Ok(Vec::new()),
        };
        let now = Utc::now();
        let mut affected = Vec::new();
        if let Some(rows) = tables.get_mut(&kind) {
            for id in matching {
                if let Some(entity) = rows.get_mut(&id) {
                    if mutation.apply(&mut entity.attributes) {
                        entity.modified_datetime = now;
                        affected.push(id);
                    }
                }
            }
        }
        Ok(affected)
    }
}

fn evaluate(tables: &Tables, entity: &Entity, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Always => true,
        Predicate::Never => false,
        Predicate::And(parts) => parts.iter().all(|p| evaluate(tables, entity, p)),
        Predicate::Or(parts) => parts.iter().any(|p| evaluate(tables, entity, p)),
        Predicate::Not(inner) => !evaluate(tables, entity, inner),
        Predicate::Compare {
            field,
            comparison,
            operand,
        } => compare(entity, field, *comparison, operand),
        Predicate::IsNull { field, is_null } => {
            let missing = match field {
                Field::Column(column) => TypeCastProjector::column_value(entity, *column).is_none(),
                Field::Attribute { key, .. } => {
                    matches!(entity.attributes.get(key), None | Some(Value::Null))
                }
            };
            missing == *is_null
        }
        Predicate::WithinRadius {
            key,
            center,
            radius_km,
        } => entity
            .attributes
            .get(key)
            .and_then(TypeCastProjector::project_geopos)
            .is_some_and(|position| position.distance_km(center) <= *radius_km),
        Predicate::VectorDistance { score, lower, upper } => entity
            .attributes
            .get(&score.key)
            .and_then(|stored| TypeCastProjector::project_vector(stored, score.dimensions))
            .and_then(|vector| score.score(&vector))
            .is_some_and(|s| score.within(s, *lower, *upper)),
        Predicate::IdIn(ids) => ids.contains(&entity.id),
        Predicate::Subset {
            entity_type,
            predicate,
        } => entity.entity_type == *entity_type && evaluate(tables, entity, predicate),
        Predicate::Related {
            relation,
            predicate,
        } => {
            let Some(related_rows) = tables.get(&relation.related) else {
                return false;
            };
            match relation.link.holder() {
                Side::Related => related_rows
                    .values()
                    .any(|r| r.media.contains(&entity.id) && evaluate(tables, r, predicate)),
                Side::Primary => entity.media.iter().any(|id| {
                    related_rows
                        .get(id)
                        .is_some_and(|r| evaluate(tables, r, predicate))
                }),
            }
        }
    }
}

fn compare(entity: &Entity, field: &Field, comparison: Comparison, operand: &Scalar) -> bool {
    // Text equality is JSON containment: only a stored string matches.
    if let (
        Field::Attribute {
            key,
            view: View::Text,
        },
        Comparison::Eq,
        Scalar::Text(expected),
    ) = (field, comparison, operand)
    {
        return matches!(entity.attributes.get(key), Some(Value::String(s)) if s == expected);
    }
    TypeCastProjector::read(entity, field).is_some_and(|actual| actual.satisfies(comparison, operand))
}

fn descending(order: &OrderBy) -> bool {
    match order {
        OrderBy::Field { descending, .. } | OrderBy::Vector { descending, .. } => *descending,
    }
}

fn sort_value(entity: &Entity, order: &OrderBy) -> Option<Scalar> {
    match order {
        OrderBy::Field { field, .. } => TypeCastProjector::read(entity, field),
        OrderBy::Vector { score, .. } => entity
            .attributes
            .get(&score.key)
            .and_then(|stored| TypeCastProjector::project_vector(stored, score.dimensions))
            .and_then(|vector| score.score(&vector))
            .map(Scalar::Float),
    }
}

/// Missing values sort last in either direction.
fn compare_sort_values(a: &Option<Scalar>, b: &Option<Scalar>, descending: bool) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ordering = x.partial_cmp_to(y).unwrap_or(Ordering::Equal);
            if descending { ordering.reverse() } else { ordering }
        }
    }
}
