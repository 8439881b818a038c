use std::collections::HashSet;

use serde_json::{Value, json};

use crate::attribute::EntityType;
use crate::attribute::validate::{canonical_datetime, cast_bool, cast_float, cast_geopos, parse_datetime};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

use super::builtin::{AttributeRef, resolve};
use super::operation::{FilterOperation, FilterValue, Operator};
use super::predicate::{Comparison, Predicate, Scalar};
use super::project::TypeCastProjector;
use super::tree::{Leaf, Method, QueryNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefix {
    Date,
    Distance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TreeOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    IContains,
    IExact,
    IStartsWith,
    IEndsWith,
    IsNull,
    In,
    Range,
}

impl TreeOp {
    fn parse(operation: &str) -> Result<(Option<Prefix>, TreeOp)> {
        let (prefix, rest) = if let Some(rest) = operation.strip_prefix("date_") {
            (Some(Prefix::Date), rest)
        } else if let Some(rest) = operation.strip_prefix("distance_") {
            (Some(Prefix::Distance), rest)
        } else {
            (None, operation)
        };
        let op = match rest {
            "eq" => TreeOp::Eq,
            "lt" => TreeOp::Lt,
            "lte" => TreeOp::Lte,
            "gt" => TreeOp::Gt,
            "gte" => TreeOp::Gte,
            "contains" => TreeOp::Contains,
            "icontains" => TreeOp::IContains,
            "iexact" => TreeOp::IExact,
            "istartswith" => TreeOp::IStartsWith,
            "iendswith" => TreeOp::IEndsWith,
            "isnull" => TreeOp::IsNull,
            "in" => TreeOp::In,
            "range" => TreeOp::Range,
            _ => return Err(Error::QueryShape(format!("unknown operation '{}'", operation))),
        };
        if prefix == Some(Prefix::Distance) && !matches!(op, TreeOp::Lt | TreeOp::Lte | TreeOp::Gt | TreeOp::Gte) {
            return Err(Error::QueryShape(format!("unknown operation '{}'", operation)));
        }
        Ok((prefix, op))
    }

    fn family(&self) -> Operator {
        match self {
            TreeOp::Eq | TreeOp::In => Operator::Eq,
            TreeOp::Lt | TreeOp::Range => Operator::Lt,
            TreeOp::Lte => Operator::Lte,
            TreeOp::Gt => Operator::Gt,
            TreeOp::Gte => Operator::Gte,
            TreeOp::Contains | TreeOp::IContains | TreeOp::IExact | TreeOp::IStartsWith | TreeOp::IEndsWith => {
                Operator::Contains
            }
            TreeOp::IsNull => Operator::Null,
        }
    }

    fn comparison(&self) -> Comparison {
        match self {
            TreeOp::Eq => Comparison::Eq,
            TreeOp::Lt => Comparison::Lt,
            TreeOp::Lte => Comparison::Lte,
            TreeOp::Gt => Comparison::Gt,
            TreeOp::Gte => Comparison::Gte,
            TreeOp::Contains => Comparison::Contains,
            TreeOp::IContains => Comparison::IContains,
            TreeOp::IExact => Comparison::IExact,
            TreeOp::IStartsWith => Comparison::IStartsWith,
            TreeOp::IEndsWith => Comparison::IEndsWith,
            TreeOp::In => Comparison::In,
            TreeOp::IsNull | TreeOp::Range => Comparison::Eq,
        }
    }
}

/// Tracks, across every type a filter is compiled against, which leaves
/// resolved somewhere and why the others failed.
#[derive(Debug, Default)]
pub(crate) struct Coverage {
    resolved: HashSet<String>,
    failures: Vec<(String, Error)>,
}

impl Coverage {
    pub(crate) fn resolved(&mut self, leaf: String) {
        self.resolved.insert(leaf);
    }

    pub(crate) fn failed(&mut self, leaf: String, error: Error) {
        self.failures.push((leaf, error));
    }

    /// Raises the first failure of a leaf that resolved nowhere.
    pub(crate) fn finish(self) -> Result<()> {
        let Coverage { resolved, failures } = self;
        match failures.into_iter().find(|(leaf, _)| !resolved.contains(leaf)) {
            Some((_, error)) => Err(error),
            None => Ok(()),
        }
    }
}

/// Type-dependent failures are recoverable per type; anything else aborts.
pub(crate) fn is_type_dependent(error: &Error) -> bool {
    matches!(error, Error::Schema { .. } | Error::ValueConversion { .. })
}

struct Pass<'c> {
    coverage: Option<&'c mut Coverage>,
    resolved: usize,
}

/// Compiles boolean combinator trees into a single [`Predicate`].
pub struct QueryTreeCompiler<'a> {
    config: &'a EngineConfig,
}

impl<'a> QueryTreeCompiler<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Strict compilation: every leaf must resolve against builtins or `entity_type`.
    pub fn compile(&self, node: &QueryNode, entity_type: Option<&EntityType>) -> Result<Predicate> {
        let mut pass = Pass {
            coverage: None,
            resolved: 0,
        };
        self.node(node, entity_type, 1, &mut pass)
    }

    /// As [`compile`](Self::compile), short-circuiting when the base collection is empty.
    pub fn compile_within(
        &self,
        base: &Predicate,
        node: &QueryNode,
        entity_type: Option<&EntityType>,
    ) -> Result<Predicate> {
        if base.is_never() {
            return Ok(Predicate::Never);
        }
        self.compile(node, entity_type)
    }

    /// Compiles against one sibling type. Leaves the type cannot evaluate
    /// take absent-key semantics and are recorded in `coverage`. Returns the
    /// predicate and the number of leaves that resolved.
    pub(crate) fn compile_lenient(
        &self,
        node: &QueryNode,
        entity_type: &EntityType,
        coverage: &mut Coverage,
    ) -> Result<(Predicate, usize)> {
        let mut pass = Pass {
            coverage: Some(coverage),
            resolved: 0,
        };
        let predicate = self.node(node, Some(entity_type), 1, &mut pass)?;
        Ok((predicate, pass.resolved))
    }

    fn node(&self, node: &QueryNode, entity_type: Option<&EntityType>, depth: usize, pass: &mut Pass) -> Result<Predicate> {
        if depth > self.config.max_query_depth {
            return Err(Error::QueryShape(format!(
                "query is deeper than {} levels",
                self.config.max_query_depth
            )));
        }
        match node {
            QueryNode::Combinator { method, operations } => {
                let mut children = Vec::with_capacity(operations.len());
                for operation in operations {
                    children.push(self.node(operation, entity_type, depth + 1, pass)?);
                }
                match method {
                    Method::And => Ok(Predicate::all(children)),
                    Method::Or if children.is_empty() => Ok(Predicate::Always),
                    Method::Or => Ok(Predicate::any(children)),
                    Method::Not => match <[Predicate; 1]>::try_from(children) {
                        Ok([child]) => Ok(child.negate()),
                        Err(children) => Err(Error::QueryShape(format!(
                            "not takes exactly one operation, got {}",
                            children.len()
                        ))),
                    },
                }
            }
            QueryNode::Leaf(leaf) => {
                let id = leaf_id(leaf);
                match self.leaf(leaf, entity_type) {
                    Ok(predicate) => {
                        pass.resolved += 1;
                        if let Some(coverage) = pass.coverage.as_deref_mut() {
                            coverage.resolved(id);
                        }
                        Ok(predicate)
                    }
                    Err(error) if is_type_dependent(&error) && pass.coverage.is_some() => {
                        if let Some(coverage) = pass.coverage.as_deref_mut() {
                            coverage.failed(id, error);
                        }
                        absent(leaf)
                    }
                    Err(error) => Err(error),
                }
            }
        }
    }

    fn leaf(&self, leaf: &Leaf, entity_type: Option<&EntityType>) -> Result<Predicate> {
        let (prefix, op) = TreeOp::parse(&leaf.operation)?;
        let attribute = resolve(&leaf.attribute, entity_type)
            .ok_or_else(|| Error::schema(&leaf.attribute, "unknown attribute"))?;
        let predicate = match prefix {
            Some(Prefix::Distance) => distance(&attribute, op, &leaf.value)?,
            Some(Prefix::Date) => {
                let normalized = normalize_dates(&attribute.key, op, &leaf.value)?;
                compile_op(&attribute, op, &normalized)?
            }
            None => compile_op(&attribute, op, &leaf.value)?,
        };
        Ok(if leaf.inverse { predicate.negate() } else { predicate })
    }

    /// Conjunction of already-resolved flat operations.
    pub fn compile_operations(operations: &[FilterOperation]) -> Result<Predicate> {
        let mut parts = Vec::with_capacity(operations.len());
        for operation in operations {
            let attribute = &operation.attribute;
            let predicate = match (operation.operator, &operation.value) {
                (Operator::Null, FilterValue::Scalar(Scalar::Bool(is_null))) => Predicate::IsNull {
                    field: TypeCastProjector::null_field(attribute),
                    is_null: *is_null,
                },
                (Operator::Distance, FilterValue::Region { center, radius_km }) => Predicate::WithinRadius {
                    key: attribute.key.clone(),
                    center: *center,
                    radius_km: *radius_km,
                },
                (operator, FilterValue::Scalar(operand)) => {
                    let comparison = match operator {
                        Operator::Eq => Comparison::Eq,
                        Operator::Lt => Comparison::Lt,
                        Operator::Lte => Comparison::Lte,
                        Operator::Gt => Comparison::Gt,
                        Operator::Gte => Comparison::Gte,
                        Operator::Contains => Comparison::IContains,
                        Operator::Null | Operator::Distance => {
                            return Err(Error::QueryShape(format!(
                                "operator '{}' on '{}' carries the wrong operand",
                                operator, attribute.key
                            )));
                        }
                    };
                    Predicate::compare(TypeCastProjector::field(attribute)?, comparison, operand.clone())
                }
                (operator, FilterValue::Region { .. }) => {
                    return Err(Error::QueryShape(format!(
                        "operator '{}' on '{}' does not take a region",
                        operator, attribute.key
                    )));
                }
            };
            parts.push(predicate);
        }
        Ok(Predicate::all(parts))
    }
}

fn leaf_id(leaf: &Leaf) -> String {
    format!("{}:{}", leaf.attribute, leaf.operation)
}

/// Leaf evaluated on a type without the attribute.
fn absent(leaf: &Leaf) -> Result<Predicate> {
    let (_, op) = TreeOp::parse(&leaf.operation)?;
    let predicate = match op {
        TreeOp::IsNull if cast_bool(&leaf.attribute, &leaf.value)? => Predicate::Always,
        _ => Predicate::Never,
    };
    Ok(if leaf.inverse { predicate.negate() } else { predicate })
}

fn compile_op(attribute: &AttributeRef, op: TreeOp, raw: &Value) -> Result<Predicate> {
    op.family().check(attribute)?;
    let key = attribute.key.as_str();
    match op {
        TreeOp::IsNull => Ok(Predicate::IsNull {
            field: TypeCastProjector::null_field(attribute),
            is_null: cast_bool(key, raw)?,
        }),
        TreeOp::In => {
            let Value::Array(items) = raw else {
                return Err(Error::conversion(key, format!("'in' expects a list, got {}", raw)));
            };
            let operands = items
                .iter()
                .map(|item| TypeCastProjector::cast_operand(attribute, item))
                .collect::<Result<Vec<_>>>()?;
            Ok(Predicate::compare(
                TypeCastProjector::field(attribute)?,
                Comparison::In,
                Scalar::List(operands),
            ))
        }
        TreeOp::Range => {
            let (low, high) = pair(key, raw)?;
            let field = TypeCastProjector::field(attribute)?;
            Ok(Predicate::all([
                Predicate::compare(field.clone(), Comparison::Gte, TypeCastProjector::cast_operand(attribute, low)?),
                Predicate::compare(field, Comparison::Lte, TypeCastProjector::cast_operand(attribute, high)?),
            ]))
        }
        TreeOp::Contains | TreeOp::IContains | TreeOp::IExact | TreeOp::IStartsWith | TreeOp::IEndsWith => {
            Ok(Predicate::compare(
                TypeCastProjector::field(attribute)?,
                op.comparison(),
                TypeCastProjector::cast_text_operand(attribute, raw)?,
            ))
        }
        TreeOp::Eq | TreeOp::Lt | TreeOp::Lte | TreeOp::Gt | TreeOp::Gte => Ok(Predicate::compare(
            TypeCastProjector::field(attribute)?,
            op.comparison(),
            TypeCastProjector::cast_operand(attribute, raw)?,
        )),
    }
}

fn pair<'v>(key: &str, raw: &'v Value) -> Result<(&'v Value, &'v Value)> {
    match raw.as_array().map(Vec::as_slice) {
        Some([low, high]) => Ok((low, high)),
        _ => Err(Error::conversion(key, format!("'range' expects [low, high], got {}", raw))),
    }
}

fn normalize_date(key: &str, raw: &Value) -> Result<Value> {
    raw.as_str()
        .and_then(parse_datetime)
        .map(|dt| Value::String(canonical_datetime(&dt)))
        .ok_or_else(|| Error::conversion(key, format!("{} is not an ISO-8601 datetime", raw)))
}

/// Range and `in` operands are normalised element by element.
fn normalize_dates(key: &str, op: TreeOp, raw: &Value) -> Result<Value> {
    match op {
        TreeOp::IsNull => Ok(raw.clone()),
        TreeOp::Range => {
            let (low, high) = pair(key, raw)?;
            Ok(json!([normalize_date(key, low)?, normalize_date(key, high)?]))
        }
        TreeOp::In => match raw {
            Value::Array(items) => items
                .iter()
                .map(|item| normalize_date(key, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Err(Error::conversion(key, format!("'in' expects a list, got {}", other))),
        },
        _ => normalize_date(key, raw),
    }
}

/// `[radius_km, lat, lon]`; lt/lte select inside the circle, gt/gte outside.
fn distance(attribute: &AttributeRef, op: TreeOp, raw: &Value) -> Result<Predicate> {
    Operator::Distance.check(attribute)?;
    let key = attribute.key.as_str();
    let Some([radius, lat, lon]) = raw.as_array().map(Vec::as_slice) else {
        return Err(Error::conversion(key, format!("distance expects [radius_km, lat, lon], got {}", raw)));
    };
    let radius_km = cast_float(key, radius)?;
    if radius_km < 0.0 {
        return Err(Error::conversion(key, "distance radius must not be negative"));
    }
    let center = cast_geopos(key, &json!([cast_float(key, lon)?, cast_float(key, lat)?]))?;
    let within = Predicate::WithinRadius {
        key: key.to_string(),
        center,
        radius_km,
    };
    Ok(match op {
        TreeOp::Lt | TreeOp::Lte => within,
        _ => Predicate::all([
            Predicate::IsNull {
                field: TypeCastProjector::null_field(attribute),
                is_null: false,
            },
            within.negate(),
        ]),
    })
}
