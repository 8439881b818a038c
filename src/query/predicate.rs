use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribute::GeoPos;

use super::related::Relation;
use super::vector::VectorScore;

/// First-class columns shared by every entity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Project,
    Type,
    Name,
    CreatedDatetime,
    ModifiedDatetime,
    ArchiveState,
    ElementalId,
    Section,
    Frame,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Project => "project",
            Column::Type => "type",
            Column::Name => "name",
            Column::CreatedDatetime => "created_datetime",
            Column::ModifiedDatetime => "modified_datetime",
            Column::ArchiveState => "archive_state",
            Column::ElementalId => "elemental_id",
            Column::Section => "section",
            Column::Frame => "frame",
        }
    }
}

/// Typed shadow view of a document value, selected from the declared dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Text,
    Boolean,
    Integer,
    Double,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Column(Column),
    Attribute { key: String, view: View },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Case-sensitive substring.
    Contains,
    /// Case-insensitive substring.
    IContains,
    IExact,
    IStartsWith,
    IEndsWith,
    In,
}

/// Comparable value: either a query operand or a projected stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Scalar>),
}

impl Scalar {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Ordering between comparable scalars; ints and floats compare numerically.
    pub fn partial_cmp_to(&self, other: &Scalar) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Scalar::Int(a), Scalar::Int(b)) => a.partial_cmp(b),
            (Scalar::Bool(a), Scalar::Bool(b)) => a.partial_cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.partial_cmp(b),
            (Scalar::Timestamp(a), Scalar::Timestamp(b)) => a.partial_cmp(b),
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }

    /// Evaluates `self <comparison> operand`.
    pub fn satisfies(&self, comparison: Comparison, operand: &Scalar) -> bool {
        use std::cmp::Ordering::*;
        match comparison {
            Comparison::Eq => self.partial_cmp_to(operand) == Some(Equal),
            Comparison::Lt => self.partial_cmp_to(operand) == Some(Less),
            Comparison::Lte => matches!(self.partial_cmp_to(operand), Some(Less | Equal)),
            Comparison::Gt => self.partial_cmp_to(operand) == Some(Greater),
            Comparison::Gte => matches!(self.partial_cmp_to(operand), Some(Greater | Equal)),
            Comparison::In => match operand {
                Scalar::List(items) => items.iter().any(|item| self.satisfies(Comparison::Eq, item)),
                single => self.satisfies(Comparison::Eq, single),
            },
            Comparison::Contains => match (self, operand) {
                (Scalar::Text(a), Scalar::Text(b)) => a.contains(b.as_str()),
                _ => false,
            },
            Comparison::IContains | Comparison::IExact | Comparison::IStartsWith | Comparison::IEndsWith => {
                let (Scalar::Text(a), Scalar::Text(b)) = (self, operand) else {
                    return false;
                };
                let (a, b) = (a.to_lowercase(), b.to_lowercase());
                match comparison {
                    Comparison::IContains => a.contains(&b),
                    Comparison::IExact => a == b,
                    Comparison::IStartsWith => a.starts_with(&b),
                    _ => a.ends_with(&b),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderBy {
    Field { field: Field, descending: bool },
    Vector { score: VectorScore, descending: bool },
}

/// A compiled filter over one entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Always,
    Never,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        field: Field,
        comparison: Comparison,
        operand: Scalar,
    },
    /// Attribute fields: key absent or explicit JSON null. Columns: SQL NULL.
    IsNull { field: Field, is_null: bool },
    WithinRadius {
        key: String,
        center: GeoPos,
        radius_km: f64,
    },
    VectorDistance {
        score: VectorScore,
        lower: Option<f64>,
        upper: Option<f64>,
    },
    IdIn(Vec<i64>),
    /// Rows of one sibling type matching an independently compiled predicate.
    Subset {
        entity_type: i64,
        predicate: Box<Predicate>,
    },
    /// Rows linked through `relation` to a related row matching `predicate`.
    Related {
        relation: Relation,
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Predicate::Never)
    }

    pub fn compare(field: Field, comparison: Comparison, operand: Scalar) -> Self {
        Predicate::Compare {
            field,
            comparison,
            operand,
        }
    }

    pub fn column_eq(column: Column, operand: Scalar) -> Self {
        Self::compare(Field::Column(column), Comparison::Eq, operand)
    }

    /// Conjunction with constant folding and flattening.
    pub fn all(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Predicate::Always => {}
                Predicate::Never => return Predicate::Never,
                Predicate::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::Always,
            1 => out.remove(0),
            _ => Predicate::And(out),
        }
    }

    /// Disjunction with constant folding and flattening.
    pub fn any(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Predicate::Never => {}
                Predicate::Always => return Predicate::Always,
                Predicate::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Predicate::Never,
            1 => out.remove(0),
            _ => Predicate::Or(out),
        }
    }

    pub fn negate(self) -> Self {
        match self {
            Predicate::Always => Predicate::Never,
            Predicate::Never => Predicate::Always,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::all([self, other])
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::any([self, other])
    }
}
