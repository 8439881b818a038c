use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Declared kind of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dtype {
    Bool,
    Int,
    Float,
    Enum,
    String,
    Datetime,
    Geopos,
    FloatArray,
}

impl Dtype {
    pub const ALL: [Dtype; 8] = [
        Dtype::Bool,
        Dtype::Int,
        Dtype::Float,
        Dtype::Enum,
        Dtype::String,
        Dtype::Datetime,
        Dtype::Geopos,
        Dtype::FloatArray,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dtype::Bool => "bool",
            Dtype::Int => "int",
            Dtype::Float => "float",
            Dtype::Enum => "enum",
            Dtype::String => "string",
            Dtype::Datetime => "datetime",
            Dtype::Geopos => "geopos",
            Dtype::FloatArray => "float_array",
        }
    }

    /// Text-like dtypes compare on the raw stored string.
    pub fn is_textual(&self) -> bool {
        matches!(self, Dtype::Enum | Dtype::String)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Dtype::Int | Dtype::Float)
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
