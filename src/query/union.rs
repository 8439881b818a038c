use tracing::debug;

use crate::attribute::{AttributeTypeRegistry, EntityType};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

use super::Collection;
use super::builtin::is_builtin;
use super::compile::{Coverage, QueryTreeCompiler, is_type_dependent};
use super::params::{FilterOperationParser, FilterParams};
use super::predicate::Predicate;
use super::tree::QueryNode;

/// Compiles filters once per sibling type when no type is pinned and
/// unions the per-type subsets by primary key.
pub struct ScatterGatherUnionBuilder<'a> {
    registry: &'a AttributeTypeRegistry,
    config: &'a EngineConfig,
}

impl<'a> ScatterGatherUnionBuilder<'a> {
    pub fn new(registry: &'a AttributeTypeRegistry, config: &'a EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &'a AttributeTypeRegistry {
        self.registry
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    /// The pinned type, checked against the collection's project and kind.
    pub fn pinned(&self, collection: &Collection) -> Result<Option<&'a EntityType>> {
        let Some(id) = collection.entity_type else {
            return Ok(None);
        };
        let entity_type = self.registry.require(id)?;
        if entity_type.project != collection.project || entity_type.kind != collection.kind {
            return Err(Error::NotFound(format!(
                "{} type {} in project {}",
                collection.kind, id, collection.project
            )));
        }
        Ok(Some(entity_type))
    }

    /// Flat parameters.
    pub fn compile_params(&self, collection: &Collection, params: &FilterParams) -> Result<Predicate> {
        if collection.base.is_never() {
            return Ok(Predicate::Never);
        }
        let parser = FilterOperationParser::new(&self.config.separator);
        let raw = parser.split(params)?;
        if raw.is_empty() {
            return Ok(Predicate::Always);
        }
        if let Some(entity_type) = self.pinned(collection)? {
            let operations = raw
                .iter()
                .map(|r| parser.resolve(r, Some(entity_type)))
                .collect::<Result<Vec<_>>>()?;
            return QueryTreeCompiler::compile_operations(&operations);
        }

        let siblings = self.registry.siblings(collection.project, collection.kind);
        if siblings.is_empty() {
            let operations = raw
                .iter()
                .map(|r| parser.resolve(r, None))
                .collect::<Result<Vec<_>>>()?;
            return QueryTreeCompiler::compile_operations(&operations);
        }
        let mut coverage = Coverage::default();
        let mut members = Vec::with_capacity(siblings.len());
        for sibling in siblings {
            let mut operations = Vec::new();
            let mut absent = Vec::new();
            for r in &raw {
                let id = format!("{}:{}", r.key, r.operator);
                match parser.resolve(r, Some(sibling)) {
                    Ok(operation) => {
                        coverage.resolved(id);
                        operations.push(operation);
                    }
                    Err(error) if is_type_dependent(&error) => {
                        coverage.failed(id, error);
                        absent.push(r.absent()?);
                    }
                    Err(error) => return Err(error),
                }
            }
            if operations.is_empty() {
                debug!(entity_type = sibling.id, "sibling contributes no filters, excluded");
                continue;
            }
            let predicate = Predicate::all(
                std::iter::once(QueryTreeCompiler::compile_operations(&operations)?).chain(absent),
            );
            members.push(subset(sibling, predicate));
        }
        coverage.finish()?;
        Ok(Predicate::any(members))
    }

    /// Structured query tree.
    pub fn compile_tree(&self, collection: &Collection, node: &QueryNode) -> Result<Predicate> {
        if collection.base.is_never() {
            return Ok(Predicate::Never);
        }
        let mut coverage = Coverage::default();
        let predicate = self.scatter_tree(collection, node, &mut coverage)?;
        coverage.finish()?;
        Ok(predicate)
    }

    /// Per-sibling compilation without the final coverage check, so callers
    /// can span several kinds.
    pub(crate) fn scatter_tree(
        &self,
        collection: &Collection,
        node: &QueryNode,
        coverage: &mut Coverage,
    ) -> Result<Predicate> {
        let compiler = QueryTreeCompiler::new(self.config);
        let leaves = node.leaves();
        if leaves.is_empty() {
            return compiler.compile(node, None);
        }
        if let Some(entity_type) = self.pinned(collection)? {
            return compiler.compile(node, Some(entity_type));
        }

        let siblings = self.registry.siblings(collection.project, collection.kind);
        if siblings.is_empty() {
            if leaves.iter().all(|leaf| is_builtin(&leaf.attribute)) {
                for leaf in &leaves {
                    coverage.resolved(format!("{}:{}", leaf.attribute, leaf.operation));
                }
                return compiler.compile(node, None);
            }
            for leaf in leaves {
                let id = format!("{}:{}", leaf.attribute, leaf.operation);
                if is_builtin(&leaf.attribute) {
                    coverage.resolved(id);
                } else {
                    coverage.failed(id, Error::schema(&leaf.attribute, "unknown attribute"));
                }
            }
            return Ok(Predicate::Never);
        }
        let mut members = Vec::with_capacity(siblings.len());
        for sibling in siblings {
            let (predicate, resolved) = compiler.compile_lenient(node, sibling, coverage)?;
            if resolved == 0 {
                debug!(entity_type = sibling.id, "sibling resolves no leaves, excluded");
                continue;
            }
            members.push(subset(sibling, predicate));
        }
        Ok(Predicate::any(members))
    }
}

fn subset(entity_type: &EntityType, predicate: Predicate) -> Predicate {
    if predicate.is_never() {
        return Predicate::Never;
    }
    Predicate::Subset {
        entity_type: entity_type.id,
        predicate: Box::new(predicate),
    }
}
