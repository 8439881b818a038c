//! Typed views over the attribute document.
//!
//! Documents are schemaless JSON, so every comparison goes through a typed
//! projection chosen from the declared dtype: `text` for enum/string, then a
//! boolean, integer, double or timestamp cast of that text. The same views are
//! rendered as SQL casts by the postgres adapter and evaluated in-process by
//! the memory adapter.

use serde_json::Value;

use crate::attribute::validate::{cast_bool, cast_datetime, cast_float, cast_int, cast_text, parse_datetime};
use crate::attribute::{Dtype, GeoPos};
use crate::entity::Entity;
use crate::error::{Error, Result};

use super::builtin::{AttributeRef, Storage};
use super::predicate::{Column, Field, Scalar, View};

pub struct TypeCastProjector;

impl TypeCastProjector {
    pub fn view_for(dtype: Dtype) -> Option<View> {
        match dtype {
            Dtype::Bool => Some(View::Boolean),
            Dtype::Int => Some(View::Integer),
            Dtype::Float => Some(View::Double),
            Dtype::Datetime => Some(View::Timestamp),
            Dtype::Enum | Dtype::String => Some(View::Text),
            Dtype::Geopos | Dtype::FloatArray => None,
        }
    }

    /// The field a scalar comparison on `attribute` reads.
    pub fn field(attribute: &AttributeRef) -> Result<Field> {
        match attribute.storage {
            Storage::Column(column) => Ok(Field::Column(column)),
            Storage::Document => {
                let view = Self::view_for(attribute.dtype).ok_or_else(|| {
                    Error::schema(
                        &attribute.key,
                        format!("dtype '{}' has no scalar view", attribute.dtype),
                    )
                })?;
                Ok(Field::Attribute {
                    key: attribute.key.clone(),
                    view,
                })
            }
        }
    }

    /// Field used by null checks; any dtype qualifies.
    pub fn null_field(attribute: &AttributeRef) -> Field {
        match attribute.storage {
            Storage::Column(column) => Field::Column(column),
            Storage::Document => Field::Attribute {
                key: attribute.key.clone(),
                view: Self::view_for(attribute.dtype).unwrap_or(View::Text),
            },
        }
    }

    /// Casts a raw operand to the attribute's dtype.
    pub fn cast_operand(attribute: &AttributeRef, raw: &Value) -> Result<Scalar> {
        let name = attribute.key.as_str();
        match attribute.dtype {
            Dtype::Bool => cast_bool(name, raw).map(Scalar::Bool),
            Dtype::Int => cast_int(name, raw).map(Scalar::Int),
            Dtype::Float => cast_float(name, raw).map(Scalar::Float),
            Dtype::Enum | Dtype::String => cast_text(name, raw).map(Scalar::Text),
            Dtype::Datetime => cast_datetime(name, raw).map(Scalar::Timestamp),
            Dtype::Geopos | Dtype::FloatArray => Err(Error::schema(
                name,
                format!("dtype '{}' has no scalar operand", attribute.dtype),
            )),
        }
    }

    /// Casts a substring/prefix operand; always text.
    pub fn cast_text_operand(attribute: &AttributeRef, raw: &Value) -> Result<Scalar> {
        cast_text(&attribute.key, raw).map(Scalar::Text)
    }

    /// Projects a stored document value through `view`. `None` when the value
    /// is null or does not cast.
    pub fn project(view: View, stored: &Value) -> Option<Scalar> {
        match (view, stored) {
            (_, Value::Null) => None,
            (View::Text, Value::String(s)) => Some(Scalar::Text(s.clone())),
            (View::Text, other) => Some(Scalar::Text(other.to_string())),
            (View::Boolean, raw) => cast_bool("", raw).ok().map(Scalar::Bool),
            (View::Integer, raw) => cast_int("", raw).ok().map(Scalar::Int),
            (View::Double, raw) => cast_float("", raw).ok().map(Scalar::Float),
            (View::Timestamp, Value::String(s)) => parse_datetime(s).map(Scalar::Timestamp),
            (View::Timestamp, _) => None,
        }
    }

    pub fn project_geopos(stored: &Value) -> Option<GeoPos> {
        match stored {
            Value::Array(items) if items.len() == 2 => Some(GeoPos::new(items[0].as_f64()?, items[1].as_f64()?)),
            _ => None,
        }
    }

    pub fn project_vector(stored: &Value, dimensions: usize) -> Option<Vec<f64>> {
        let items = stored.as_array()?;
        if items.len() != dimensions {
            return None;
        }
        items.iter().map(Value::as_f64).collect()
    }

    pub fn column_value(entity: &Entity, column: Column) -> Option<Scalar> {
        match column {
            Column::Id => Some(Scalar::Int(entity.id)),
            Column::Project => Some(Scalar::Int(entity.project)),
            Column::Type => Some(Scalar::Int(entity.entity_type)),
            Column::Name => Some(Scalar::Text(entity.name.clone())),
            Column::CreatedDatetime => Some(Scalar::Timestamp(entity.created_datetime)),
            Column::ModifiedDatetime => Some(Scalar::Timestamp(entity.modified_datetime)),
            Column::ArchiveState => Some(Scalar::Text(entity.archive_state.as_str().to_string())),
            Column::ElementalId => Some(Scalar::Text(entity.elemental_id.to_string())),
            Column::Section => entity.section.map(Scalar::Int),
            Column::Frame => entity.frame.map(Scalar::Int),
        }
    }

    /// Reads `field` off an in-memory entity.
    pub fn read(entity: &Entity, field: &Field) -> Option<Scalar> {
        match field {
            Field::Column(column) => Self::column_value(entity, *column),
            Field::Attribute { key, view } => entity
                .attributes
                .get(key)
                .and_then(|stored| Self::project(*view, stored)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeTypeSpec, EntityKind, EntityType};
    use crate::query::builtin::resolve;
    use serde_json::json;

    fn fish() -> EntityType {
        EntityType::new(1, 1, EntityKind::Localization, "Fish")
            .with_attribute(AttributeTypeSpec::new("Length", Dtype::Float))
            .with_attribute(AttributeTypeSpec::new("Seen", Dtype::Datetime))
            .with_attribute(AttributeTypeSpec::new("Where", Dtype::Geopos))
    }

    #[test]
    fn views_follow_dtype() {
        let t = fish();
        let length = resolve("Length", Some(&t)).unwrap();
        assert_eq!(
            TypeCastProjector::field(&length).unwrap(),
            Field::Attribute {
                key: "Length".into(),
                view: View::Double
            }
        );
        assert_eq!(
            TypeCastProjector::field(&resolve("$frame", None).unwrap()).unwrap(),
            Field::Column(Column::Frame)
        );
        let place = resolve("Where", Some(&t)).unwrap();
        assert!(TypeCastProjector::field(&place).is_err());
    }

    #[test]
    fn operands_cast_to_dtype() {
        let t = fish();
        let length = resolve("Length", Some(&t)).unwrap();
        assert_eq!(
            TypeCastProjector::cast_operand(&length, &json!("3.5")).unwrap(),
            Scalar::Float(3.5)
        );
        assert!(matches!(
            TypeCastProjector::cast_operand(&length, &json!("long")),
            Err(Error::ValueConversion { .. })
        ));
        let seen = resolve("Seen", Some(&t)).unwrap();
        assert!(matches!(
            TypeCastProjector::cast_operand(&seen, &json!("2024-01-01")).unwrap(),
            Scalar::Timestamp(_)
        ));
    }

    #[test]
    fn projection_drops_nulls_and_uncastable_values() {
        assert_eq!(TypeCastProjector::project(View::Double, &json!(2)), Some(Scalar::Float(2.0)));
        assert_eq!(TypeCastProjector::project(View::Integer, &json!("x")), None);
        assert_eq!(TypeCastProjector::project(View::Text, &Value::Null), None);
        assert_eq!(
            TypeCastProjector::project_geopos(&json!([10.0, 20.0])),
            Some(GeoPos::new(10.0, 20.0))
        );
        assert_eq!(TypeCastProjector::project_vector(&json!([1.0, 2.0]), 3), None);
    }
}
