use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attribute::EntityType;
use crate::attribute::validate::{cast_bool, cast_float, cast_geopos};
use crate::error::{Error, Result};

use super::builtin::resolve;
use super::operation::{FilterOperation, FilterValue, Operator};
use super::predicate::{Predicate, Scalar};
use super::project::TypeCastProjector;

/// Flat, key-scoped filter parameters. Each entry is a comma-separated list
/// of `name<sep>value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub attribute: Vec<String>,
    pub attribute_lt: Vec<String>,
    pub attribute_lte: Vec<String>,
    pub attribute_gt: Vec<String>,
    pub attribute_gte: Vec<String>,
    pub attribute_contains: Vec<String>,
    pub attribute_distance: Vec<String>,
    pub attribute_null: Vec<String>,
}

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.families().all(|(_, entries)| entries.is_empty())
    }

    /// Adds one entry to the family of `operator`.
    pub fn with(mut self, operator: Operator, entry: impl Into<String>) -> Self {
        let family = match operator {
            Operator::Eq => &mut self.attribute,
            Operator::Lt => &mut self.attribute_lt,
            Operator::Lte => &mut self.attribute_lte,
            Operator::Gt => &mut self.attribute_gt,
            Operator::Gte => &mut self.attribute_gte,
            Operator::Contains => &mut self.attribute_contains,
            Operator::Distance => &mut self.attribute_distance,
            Operator::Null => &mut self.attribute_null,
        };
        family.push(entry.into());
        self
    }

    fn families(&self) -> impl Iterator<Item = (Operator, &Vec<String>)> {
        [
            (Operator::Eq, &self.attribute),
            (Operator::Lt, &self.attribute_lt),
            (Operator::Lte, &self.attribute_lte),
            (Operator::Gt, &self.attribute_gt),
            (Operator::Gte, &self.attribute_gte),
            (Operator::Contains, &self.attribute_contains),
            (Operator::Distance, &self.attribute_distance),
            (Operator::Null, &self.attribute_null),
        ]
        .into_iter()
    }
}

/// A split but unresolved filter entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFilter {
    pub key: String,
    pub operator: Operator,
    pub value: String,
}

impl RawFilter {
    /// Predicate for a type that has no such attribute: comparisons never
    /// hold, `null=true` always does.
    pub fn absent(&self) -> Result<Predicate> {
        match self.operator {
            Operator::Null => {
                let is_null = cast_bool(&self.key, &Value::String(self.value.clone()))?;
                Ok(if is_null { Predicate::Always } else { Predicate::Never })
            }
            _ => Ok(Predicate::Never),
        }
    }
}

pub struct FilterOperationParser<'a> {
    separator: &'a str,
}

impl<'a> FilterOperationParser<'a> {
    pub fn new(separator: &'a str) -> Self {
        Self { separator }
    }

    /// Splits every family into `(key, operator, raw value)` entries.
    pub fn split(&self, params: &FilterParams) -> Result<Vec<RawFilter>> {
        let mut out = Vec::new();
        for (operator, entries) in params.families() {
            for entry in entries.iter().flat_map(|e| e.split(',')) {
                let entry = entry.trim();
                if entry.is_empty() {
                    continue;
                }
                let Some((key, value)) = entry.split_once(self.separator) else {
                    return Err(Error::QueryShape(format!(
                        "filter '{}' is not of the form name{}value",
                        entry, self.separator
                    )));
                };
                out.push(RawFilter {
                    key: key.trim().to_string(),
                    operator,
                    value: value.trim().to_string(),
                });
            }
        }
        Ok(out)
    }

    /// Resolves one entry against builtins and `entity_type`, checks operator
    /// legality and casts the operand.
    pub fn resolve(&self, raw: &RawFilter, entity_type: Option<&EntityType>) -> Result<FilterOperation> {
        let attribute = resolve(&raw.key, entity_type)
            .ok_or_else(|| Error::schema(&raw.key, "unknown attribute"))?;
        raw.operator.check(&attribute)?;
        let text = Value::String(raw.value.clone());
        let value = match raw.operator {
            Operator::Eq | Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
                FilterValue::Scalar(TypeCastProjector::cast_operand(&attribute, &text)?)
            }
            Operator::Contains => FilterValue::Scalar(TypeCastProjector::cast_text_operand(&attribute, &text)?),
            Operator::Null => FilterValue::Scalar(Scalar::Bool(cast_bool(&raw.key, &text)?)),
            Operator::Distance => self.region(&raw.key, &raw.value)?,
        };
        Ok(FilterOperation {
            attribute,
            operator: raw.operator,
            value,
        })
    }

    /// `radius_km<sep>lat<sep>lon`.
    fn region(&self, key: &str, value: &str) -> Result<FilterValue> {
        let parts: Vec<&str> = value.split(self.separator).map(str::trim).collect();
        let [radius, lat, lon] = parts.as_slice() else {
            return Err(Error::conversion(
                key,
                format!("distance expects radius{0}lat{0}lon, got '{1}'", self.separator, value),
            ));
        };
        let radius_km = cast_float(key, &Value::String(radius.to_string()))?;
        if radius_km < 0.0 {
            return Err(Error::conversion(key, "distance radius must not be negative"));
        }
        let center = cast_geopos(key, &Value::String(format!("{}_{}", lat, lon)))?;
        Ok(FilterValue::Region { center, radius_km })
    }

    /// Strict parse against one type: every name must resolve.
    pub fn parse(&self, params: &FilterParams, entity_type: Option<&EntityType>) -> Result<Vec<FilterOperation>> {
        self.split(params)?
            .iter()
            .map(|raw| self.resolve(raw, entity_type))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeTypeSpec, Dtype, EntityKind, GeoPos};

    fn boat() -> EntityType {
        EntityType::new(3, 1, EntityKind::Localization, "Boat")
            .with_attribute(AttributeTypeSpec::new("Species", Dtype::Enum).with_choices(["Tuna", "Cod"]))
            .with_attribute(AttributeTypeSpec::new("Length", Dtype::Float))
            .with_attribute(AttributeTypeSpec::new("Where", Dtype::Geopos))
    }

    #[test]
    fn splits_comma_lists_across_families() {
        let params = FilterParams::new()
            .with(Operator::Eq, "Species::Tuna,$frame::10")
            .with(Operator::Gt, "Length::2.5");
        let parser = FilterOperationParser::new("::");
        let raw = parser.split(&params).unwrap();
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[1].key, "$frame");
        assert_eq!(raw[2].operator, Operator::Gt);
    }

    #[test]
    fn custom_separator() {
        let params = FilterParams::new().with(Operator::Eq, "Species|Tuna");
        let ops = FilterOperationParser::new("|").parse(&params, Some(&boat())).unwrap();
        assert_eq!(ops[0].value, FilterValue::Scalar(Scalar::Text("Tuna".into())));
    }

    #[test]
    fn operand_cast_ignores_write_constraints() {
        // "Shark" is not a declared choice, but queries are not writes.
        let params = FilterParams::new().with(Operator::Eq, "Species::Shark");
        assert!(FilterOperationParser::new("::").parse(&params, Some(&boat())).is_ok());
    }

    #[test]
    fn distance_decodes_region() {
        let params = FilterParams::new().with(Operator::Distance, "Where::5::37.5::-122.25");
        let ops = FilterOperationParser::new("::").parse(&params, Some(&boat())).unwrap();
        assert_eq!(
            ops[0].value,
            FilterValue::Region {
                center: GeoPos::new(-122.25, 37.5),
                radius_km: 5.0
            }
        );
    }

    #[test]
    fn failures_are_typed() {
        let parser = FilterOperationParser::new("::");
        let t = boat();
        let unknown = FilterParams::new().with(Operator::Eq, "Colour::red");
        assert!(matches!(parser.parse(&unknown, Some(&t)), Err(Error::Schema { .. })));
        let illegal = FilterParams::new().with(Operator::Lt, "Species::Tuna");
        assert!(matches!(parser.parse(&illegal, Some(&t)), Err(Error::Schema { .. })));
        let bad_number = FilterParams::new().with(Operator::Gt, "Length::long");
        assert!(matches!(parser.parse(&bad_number, Some(&t)), Err(Error::ValueConversion { .. })));
        let malformed = FilterParams::new().with(Operator::Eq, "Species");
        assert!(matches!(parser.parse(&malformed, Some(&t)), Err(Error::QueryShape(_))));
    }

    #[test]
    fn absent_semantics() {
        let null = RawFilter {
            key: "Colour".into(),
            operator: Operator::Null,
            value: "true".into(),
        };
        assert_eq!(null.absent().unwrap(), Predicate::Always);
        let eq = RawFilter {
            key: "Colour".into(),
            operator: Operator::Eq,
            value: "red".into(),
        };
        assert_eq!(eq.absent().unwrap(), Predicate::Never);
    }
}
