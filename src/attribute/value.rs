use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::Dtype;

/// Geographic position in canonical storage order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPos {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPos {
    /// Stored in place of a geopos that was explicitly nulled.
    pub const NULL_SENTINEL: GeoPos = GeoPos {
        lon: -1.0,
        lat: -1.0,
    };

    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &GeoPos) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0088;
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// A validated attribute value, tagged with its dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Enum(String),
    String(String),
    /// Canonical UTC ISO-8601 text.
    Datetime(String),
    Geopos(GeoPos),
    FloatArray(Vec<f64>),
    Null,
}

impl AttributeValue {
    pub fn dtype(&self) -> Option<Dtype> {
        match self {
            AttributeValue::Bool(_) => Some(Dtype::Bool),
            AttributeValue::Int(_) => Some(Dtype::Int),
            AttributeValue::Float(_) => Some(Dtype::Float),
            AttributeValue::Enum(_) => Some(Dtype::Enum),
            AttributeValue::String(_) => Some(Dtype::String),
            AttributeValue::Datetime(_) => Some(Dtype::Datetime),
            AttributeValue::Geopos(_) => Some(Dtype::Geopos),
            AttributeValue::FloatArray(_) => Some(Dtype::FloatArray),
            AttributeValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// The stored document form. Geopos is written `[lon, lat]`.
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Bool(b) => Value::Bool(*b),
            AttributeValue::Int(i) => Value::Number(Number::from(*i)),
            AttributeValue::Float(f) => float_to_json(*f),
            AttributeValue::Enum(s) | AttributeValue::String(s) | AttributeValue::Datetime(s) => {
                Value::String(s.clone())
            }
            AttributeValue::Geopos(pos) => Value::Array(vec![float_to_json(pos.lon), float_to_json(pos.lat)]),
            AttributeValue::FloatArray(values) => {
                Value::Array(values.iter().copied().map(float_to_json).collect())
            }
            AttributeValue::Null => Value::Null,
        }
    }
}

fn float_to_json(f: f64) -> Value {
    Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

impl From<AttributeValue> for Value {
    fn from(value: AttributeValue) -> Self {
        value.to_json()
    }
}
