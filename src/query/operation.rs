use std::fmt::Display;

use crate::attribute::{Dtype, GeoPos};
use crate::error::{Error, Result};

use super::builtin::AttributeRef;
use super::predicate::Scalar;

/// Operator families. Every tree operation maps onto one of these for the
/// dtype legality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    Distance,
    Null,
}

const ORDERED: &[Dtype] = &[Dtype::Int, Dtype::Float, Dtype::Datetime];

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Contains => "contains",
            Operator::Distance => "distance",
            Operator::Null => "null",
        }
    }

    pub fn allowed_dtypes(&self) -> &'static [Dtype] {
        match self {
            Operator::Eq => &[
                Dtype::Bool,
                Dtype::Int,
                Dtype::Float,
                Dtype::Enum,
                Dtype::String,
                Dtype::Datetime,
            ],
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => ORDERED,
            Operator::Contains => &[Dtype::Enum, Dtype::String],
            Operator::Distance => &[Dtype::Geopos],
            Operator::Null => &Dtype::ALL,
        }
    }

    pub fn allows(&self, dtype: Dtype) -> bool {
        self.allowed_dtypes().contains(&dtype)
    }

    /// Fails with a schema error naming both the operator and the dtype.
    pub fn check(&self, attribute: &AttributeRef) -> Result<()> {
        if self.allows(attribute.dtype) {
            Ok(())
        } else {
            Err(Error::schema(
                &attribute.key,
                format!("operator '{}' is not allowed for dtype '{}'", self, attribute.dtype),
            ))
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(Scalar),
    Region { center: GeoPos, radius_km: f64 },
}

/// One flat filter resolved against a type: the name, its dtype and the cast operand.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOperation {
    pub attribute: AttributeRef,
    pub operator: Operator,
    pub value: FilterValue,
}

impl FilterOperation {
    pub fn key(&self) -> &str {
        &self.attribute.key
    }
}
