mod dtype;
pub mod registry;
mod spec;
pub mod validate;
mod value;

pub use dtype::Dtype;
pub use registry::AttributeTypeRegistry;
pub use spec::{AttributeTypeSpec, EntityKind, EntityType};
pub use validate::AttributeValidator;
pub use value::{AttributeValue, GeoPos};

/// Reserved pseudo-attribute holding legacy section membership. Writable and
/// filterable on every type without a declaration.
pub const LEGACY_SECTION_ATTRIBUTE: &str = "tator_user_sections";
