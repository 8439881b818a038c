//! Query compilation: flat parameters and boolean trees in, [`Predicate`]s out.

pub mod builtin;
pub mod compile;
pub mod operation;
pub mod order;
pub mod params;
pub mod predicate;
pub mod project;
pub mod related;
pub mod section;
pub mod tree;
pub mod union;
pub mod vector;

use serde::{Deserialize, Serialize};

use crate::attribute::EntityKind;

pub use compile::QueryTreeCompiler;
pub use operation::{FilterOperation, FilterValue, Operator};
pub use order::SortResolver;
pub use params::{FilterOperationParser, FilterParams};
pub use predicate::{Column, Comparison, Field, OrderBy, Predicate, Scalar, SortOrder, View};
pub use project::TypeCastProjector;
pub use related::{Link, Relation, RelatedSearchBridge, Side};
pub use section::{Section, SectionKind, SectionResolver};
pub use tree::{Leaf, Method, QueryNode};
pub use union::ScatterGatherUnionBuilder;
pub use vector::{Metric, VectorQuery, VectorScore, VectorSimilarityFilter};

/// The rows a request runs against: one kind in one project, optionally
/// pinned to a single type, narrowed by the caller's access filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub project: i64,
    pub kind: EntityKind,
    pub entity_type: Option<i64>,
    pub base: Predicate,
}

impl Collection {
    pub fn new(project: i64, kind: EntityKind) -> Self {
        Self {
            project,
            kind,
            entity_type: None,
            base: Predicate::Always,
        }
    }

    pub fn pinned(mut self, entity_type: i64) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn with_base(mut self, base: Predicate) -> Self {
        self.base = base;
        self
    }

    /// Project, pinned type and base filter.
    pub fn scope(&self) -> Predicate {
        Predicate::all([
            Predicate::column_eq(Column::Project, Scalar::Int(self.project)),
            self.entity_type
                .map(|t| Predicate::column_eq(Column::Type, Scalar::Int(t)))
                .unwrap_or(Predicate::Always),
            self.base.clone(),
        ])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    #[serde(flatten)]
    pub params: FilterParams,
    pub object_search: Option<QueryNode>,
    pub related_search: Option<QueryNode>,
    pub sections: Vec<Section>,
    pub vector: Option<VectorQuery>,
    pub sort_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(mut self, params: FilterParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_object_search(mut self, node: QueryNode) -> Self {
        self.object_search = Some(node);
        self
    }

    pub fn with_related_search(mut self, node: QueryNode) -> Self {
        self.related_search = Some(node);
        self
    }

    pub fn in_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    pub fn with_vector(mut self, vector: VectorQuery) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>) -> Self {
        self.sort_by.push(key.into());
        self
    }

    pub fn paginate(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

/// A fully compiled request, ready for an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSearch {
    pub kind: EntityKind,
    pub predicate: Predicate,
    pub order: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl CompiledSearch {
    pub fn new(kind: EntityKind, predicate: Predicate) -> Self {
        Self {
            kind,
            predicate,
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predicate.is_never()
    }
}
