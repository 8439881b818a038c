//! Set-based edits of the attribute document across many rows.
//!
//! Every mutation touches one key and is idempotent: re-running a patch
//! writes the same value, re-running a rename or delete finds nothing left
//! to move. The mutator does no type checking; [`crate::Engine`] validates
//! values before they get here.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::adapters::Adapter;
use crate::attribute::EntityKind;
use crate::entity::{ChangeEntry, ChangeRecord};
use crate::error::Result;
use crate::query::Predicate;

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeMutation {
    /// Writes `key`. Without `create_if_missing`, rows lacking the key are untouched.
    Patch {
        key: String,
        value: Value,
        create_if_missing: bool,
    },
    /// Moves the value under `from` to `to`. Rows without `from` are
    /// untouched; without `create_if_missing`, so are rows lacking `to`.
    Rename {
        from: String,
        to: String,
        create_if_missing: bool,
    },
    Delete { key: String },
}

impl AttributeMutation {
    /// Applies the mutation to one document. Returns whether the row counts as affected.
    pub fn apply(&self, document: &mut Map<String, Value>) -> bool {
        match self {
            AttributeMutation::Patch {
                key,
                value,
                create_if_missing,
            } => {
                if !create_if_missing && !document.contains_key(key) {
                    return false;
                }
                document.insert(key.clone(), value.clone());
                true
            }
            AttributeMutation::Rename {
                from,
                to,
                create_if_missing,
            } => {
                if !document.contains_key(from) || (!create_if_missing && !document.contains_key(to)) {
                    return false;
                }
                if from != to {
                    if let Some(value) = document.remove(from) {
                        document.insert(to.clone(), value);
                    }
                }
                true
            }
            AttributeMutation::Delete { key } => document.remove(key).is_some(),
        }
    }

    /// Audit record. Bulk edits do not read previous values, so `old`
    /// entries carry null.
    pub fn change_record(&self) -> ChangeRecord {
        let entry = |name: &str, value: Value| ChangeEntry {
            name: name.to_string(),
            value,
        };
        match self {
            AttributeMutation::Patch { key, value, .. } => ChangeRecord {
                old: vec![entry(key, Value::Null)],
                new: vec![entry(key, value.clone())],
            },
            AttributeMutation::Rename { from, to, .. } => ChangeRecord {
                old: vec![entry(from, Value::Null)],
                new: vec![entry(to, Value::Null)],
            },
            AttributeMutation::Delete { key } => ChangeRecord {
                old: vec![entry(key, Value::Null)],
                new: Vec::new(),
            },
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            AttributeMutation::Patch { .. } => "patch",
            AttributeMutation::Rename { .. } => "rename",
            AttributeMutation::Delete { .. } => "delete",
        }
    }
}

/// Receives one [`ChangeRecord`] per applied mutation.
pub trait ChangeLog: Send + Sync {
    fn record(&self, kind: EntityKind, ids: &[i64], change: &ChangeRecord);
}

/// Plans and runs bulk mutations, one statement per key.
pub struct BulkAttributeMutator;

impl BulkAttributeMutator {
    pub fn patch(values: Map<String, Value>, create_if_missing: bool) -> Vec<AttributeMutation> {
        values
            .into_iter()
            .map(|(key, value)| AttributeMutation::Patch {
                key,
                value,
                create_if_missing,
            })
            .collect()
    }

    pub fn rename<I, S>(pairs: I, create_if_missing: bool) -> Vec<AttributeMutation>
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        pairs
            .into_iter()
            .map(|(from, to)| AttributeMutation::Rename {
                from: from.into(),
                to: to.into(),
                create_if_missing,
            })
            .collect()
    }

    pub fn delete<I, S>(keys: I) -> Vec<AttributeMutation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        keys.into_iter()
            .map(|key| AttributeMutation::Delete { key: key.into() })
            .collect()
    }

    /// Runs `mutations` in order against rows of `kind` matching `scope`.
    /// Returns the number of distinct rows affected by any of them.
    pub async fn execute(
        adapter: &dyn Adapter,
        kind: EntityKind,
        scope: &Predicate,
        mutations: &[AttributeMutation],
        changelog: Option<&Arc<dyn ChangeLog>>,
    ) -> Result<u64> {
        let scoped: Vec<(Predicate, AttributeMutation)> = mutations
            .iter()
            .map(|mutation| (scope.clone(), mutation.clone()))
            .collect();
        Self::execute_scoped(adapter, kind, &scoped, changelog).await
    }

    /// Like [`execute`](Self::execute), with a scope per mutation.
    pub async fn execute_scoped(
        adapter: &dyn Adapter,
        kind: EntityKind,
        mutations: &[(Predicate, AttributeMutation)],
        changelog: Option<&Arc<dyn ChangeLog>>,
    ) -> Result<u64> {
        let mut affected = BTreeSet::new();
        for (scope, mutation) in mutations {
            if scope.is_never() {
                continue;
            }
            let ids = adapter.apply_mutation(kind, scope, mutation).await?;
            info!(
                kind = %kind,
                mutation = mutation.describe(),
                rows = ids.len(),
                "applied attribute mutation"
            );
            metrics::counter!("taxis.mutation.rows", "kind" => kind.table_name(), "op" => mutation.describe())
                .increment(ids.len() as u64);
            if let Some(changelog) = changelog {
                if !ids.is_empty() {
                    changelog.record(kind, &ids, &mutation.change_record());
                }
            }
            affected.extend(ids);
        }
        Ok(affected.len() as u64)
    }
}
