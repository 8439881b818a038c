use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// Unknown attribute, illegal operator for a dtype, or unknown relationship.
    #[error("Schema error on '{attribute}': {reason}")]
    Schema { attribute: String, reason: String },

    /// A raw value failed dtype conversion, range, choice-set or length checks.
    #[error("Cannot convert value for '{attribute}': {reason}")]
    ValueConversion { attribute: String, reason: String },

    /// Malformed combinator tree.
    #[error("Malformed query: {0}")]
    QueryShape(String),

    /// The operation needs a single pinned entity type.
    #[error("Ambiguous entity type: {0}")]
    AmbiguousType(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Deserialization error: {0}")]
    Deserialize(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    pub(crate) fn schema(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Schema {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn conversion(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ValueConversion {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag, handy for API error bodies.
    pub const fn kind(&self) -> &'static str {
        match self {
            Error::Schema { .. } => "SCHEMA",
            Error::ValueConversion { .. } => "VALUE_CONVERSION",
            Error::QueryShape(_) => "QUERY_SHAPE",
            Error::AmbiguousType(_) => "AMBIGUOUS_TYPE",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Deserialize(_) => "DESERIALIZE",
            Error::Storage(_) => "STORAGE",
        }
    }
}
