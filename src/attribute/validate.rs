use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};

use super::{AttributeTypeSpec, AttributeValue, Dtype, EntityType, GeoPos, LEGACY_SECTION_ATTRIBUTE};
use crate::error::{Error, Result};

static LEGACY_SECTION_SPEC: Lazy<AttributeTypeSpec> =
    Lazy::new(|| AttributeTypeSpec::new(LEGACY_SECTION_ATTRIBUTE, Dtype::String));

/// Converts raw values into dtype-checked [`AttributeValue`]s.
pub struct AttributeValidator;

impl AttributeValidator {
    /// Converts one raw value against its declaration, enforcing range,
    /// choice-set and dimension constraints.
    pub fn convert(spec: &AttributeTypeSpec, raw: &Value) -> Result<AttributeValue> {
        let name = spec.name.as_str();
        if raw.is_null() {
            return Err(Error::conversion(
                name,
                "null is not a value; request it through the null keys",
            ));
        }
        match spec.dtype {
            Dtype::Bool => cast_bool(name, raw).map(AttributeValue::Bool),
            Dtype::Int => {
                let value = cast_int(name, raw)?;
                check_range(spec, value as f64)?;
                Ok(AttributeValue::Int(value))
            }
            Dtype::Float => {
                let value = cast_float(name, raw)?;
                check_range(spec, value)?;
                Ok(AttributeValue::Float(value))
            }
            Dtype::Enum => {
                let value = cast_text(name, raw)?;
                if spec.choices.iter().any(|c| *c == value) {
                    Ok(AttributeValue::Enum(value))
                } else {
                    Err(Error::conversion(
                        name,
                        format!("'{}' is not one of [{}]", value, spec.choices.join(", ")),
                    ))
                }
            }
            Dtype::String => cast_text(name, raw).map(AttributeValue::String),
            Dtype::Datetime => {
                cast_datetime(name, raw).map(|dt| AttributeValue::Datetime(canonical_datetime(&dt)))
            }
            Dtype::Geopos => cast_geopos(name, raw).map(AttributeValue::Geopos),
            Dtype::FloatArray => {
                let values = cast_float_array(name, raw)?;
                if let Some(dimensions) = spec.dimensions {
                    if values.len() != dimensions {
                        return Err(Error::conversion(
                            name,
                            format!("expected {} elements, got {}", dimensions, values.len()),
                        ));
                    }
                }
                Ok(AttributeValue::FloatArray(values))
            }
        }
    }

    /// Validates an update: converts every supplied key, resets `reset_keys`
    /// to their declared defaults and nulls `null_keys`.
    pub fn validate(
        entity_type: &EntityType,
        candidate: &Map<String, Value>,
        reset_keys: &[String],
        null_keys: &[String],
    ) -> Result<BTreeMap<String, AttributeValue>> {
        let mut out = BTreeMap::new();
        for (key, raw) in candidate {
            let spec = declaration(entity_type, key)?;
            out.insert(key.clone(), Self::convert(spec, raw)?);
        }
        for key in reset_keys {
            let spec = declaration(entity_type, key)?;
            let value = match &spec.default {
                Some(default) => Self::convert(spec, default)?,
                None => AttributeValue::Null,
            };
            out.insert(key.clone(), value);
        }
        for key in null_keys {
            let spec = declaration(entity_type, key)?;
            let value = match spec.dtype {
                Dtype::Geopos => AttributeValue::Geopos(GeoPos::NULL_SENTINEL),
                _ => AttributeValue::Null,
            };
            out.insert(key.clone(), value);
        }
        Ok(out)
    }

    /// Validates the full document of a new entity: supplied keys are
    /// converted, absent keys take their default, and a required attribute
    /// with neither fails.
    pub fn validate_new(
        entity_type: &EntityType,
        candidate: &Map<String, Value>,
    ) -> Result<BTreeMap<String, AttributeValue>> {
        let mut out = Self::validate(entity_type, candidate, &[], &[])?;
        for spec in &entity_type.attribute_types {
            if out.contains_key(&spec.name) {
                continue;
            }
            match &spec.default {
                Some(default) => {
                    out.insert(spec.name.clone(), Self::convert(spec, default)?);
                }
                None if spec.required => {
                    return Err(Error::conversion(&spec.name, "required attribute is missing"));
                }
                None => {}
            }
        }
        Ok(out)
    }

    pub fn into_document(values: BTreeMap<String, AttributeValue>) -> Map<String, Value> {
        values
            .into_iter()
            .map(|(key, value)| (key, value.to_json()))
            .collect()
    }
}

fn declaration<'a>(entity_type: &'a EntityType, key: &str) -> Result<&'a AttributeTypeSpec> {
    if key == LEGACY_SECTION_ATTRIBUTE {
        return Ok(&LEGACY_SECTION_SPEC);
    }
    entity_type.attribute(key).ok_or_else(|| {
        Error::schema(
            key,
            format!("not declared on entity type {} ({})", entity_type.id, entity_type.name),
        )
    })
}

fn check_range(spec: &AttributeTypeSpec, value: f64) -> Result<()> {
    if let Some(min) = spec.minimum {
        if value < min {
            return Err(Error::conversion(
                &spec.name,
                format!("{} is below the minimum {}", value, min),
            ));
        }
    }
    if let Some(max) = spec.maximum {
        if value > max {
            return Err(Error::conversion(
                &spec.name,
                format!("{} is above the maximum {}", value, max),
            ));
        }
    }
    Ok(())
}

// Unconstrained casts, shared with query operand casting.

pub(crate) fn cast_bool(name: &str, raw: &Value) -> Result<bool> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
        other => Err(Error::conversion(name, format!("{} is not a bool", other))),
    }
}

pub(crate) fn cast_int(name: &str, raw: &Value) -> Result<i64> {
    let parsed = match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    };
    parsed.ok_or_else(|| Error::conversion(name, format!("{} is not an integer", raw)))
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

pub(crate) fn cast_float(name: &str, raw: &Value) -> Result<f64> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(f) if f.is_finite() => Ok(f),
        _ => Err(Error::conversion(name, format!("{} is not a finite number", raw))),
    }
}

pub(crate) fn cast_text(name: &str, raw: &Value) -> Result<String> {
    match raw {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::conversion(name, format!("{} is not a scalar", other))),
    }
}

pub(crate) fn cast_datetime(name: &str, raw: &Value) -> Result<DateTime<Utc>> {
    raw.as_str()
        .and_then(parse_datetime)
        .ok_or_else(|| Error::conversion(name, format!("{} is not an ISO-8601 datetime", raw)))
}

/// Accepts `[lon, lat]` or the legacy `"lat_lon"` text form.
pub(crate) fn cast_geopos(name: &str, raw: &Value) -> Result<GeoPos> {
    let (lon, lat) = match raw {
        Value::Array(items) if items.len() == 2 => {
            (cast_float(name, &items[0])?, cast_float(name, &items[1])?)
        }
        Value::String(s) => {
            let mut parts = s.split('_');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(lat), Some(lon), None) => {
                    let lat = cast_float(name, &Value::String(lat.to_string()))?;
                    let lon = cast_float(name, &Value::String(lon.to_string()))?;
                    (lon, lat)
                }
                _ => {
                    return Err(Error::conversion(name, format!("'{}' is not a lat_lon pair", s)));
                }
            }
        }
        other => {
            return Err(Error::conversion(name, format!("{} is not a [lon, lat] pair", other)));
        }
    };
    if !(-90.0..=90.0).contains(&lat) {
        return Err(Error::conversion(name, format!("latitude {} out of range", lat)));
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(Error::conversion(name, format!("longitude {} out of range", lon)));
    }
    Ok(GeoPos { lon, lat })
}

pub(crate) fn cast_float_array(name: &str, raw: &Value) -> Result<Vec<f64>> {
    match raw {
        Value::Array(items) => items.iter().map(|item| cast_float(name, item)).collect(),
        other => Err(Error::conversion(name, format!("{} is not an array", other))),
    }
}

pub(crate) fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub(crate) fn canonical_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
