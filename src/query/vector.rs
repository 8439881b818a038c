use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeTypeRegistry, Dtype};
use crate::error::{Error, Result};

use super::Collection;
use super::predicate::{OrderBy, Predicate, SortOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Metric {
    /// Euclidean distance.
    #[default]
    #[serde(rename = "l2norm")]
    L2Norm,
    /// `1 - cosine similarity`.
    #[serde(rename = "cosine")]
    Cosine,
    /// Dot product.
    #[serde(rename = "inner_product")]
    InnerProduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::L2Norm => "l2norm",
            Metric::Cosine => "cosine",
            Metric::InnerProduct => "inner_product",
        }
    }
}

/// Nearest-neighbour request over one `float_array` attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    pub attribute: String,
    pub center: Vec<f64>,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
    #[serde(default)]
    pub order: SortOrder,
}

impl VectorQuery {
    pub fn new(attribute: impl Into<String>, center: Vec<f64>, metric: Metric) -> Self {
        Self {
            attribute: attribute.into(),
            center,
            metric,
            lower_bound: None,
            upper_bound: None,
            order: SortOrder::Asc,
        }
    }

    pub fn bounded(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Desc;
        self
    }
}

/// Score expression of stored vectors against a fixed center.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorScore {
    pub key: String,
    pub dimensions: usize,
    pub center: Vec<f64>,
    pub metric: Metric,
}

impl VectorScore {
    /// `None` when the cosine distance is undefined (a zero vector).
    pub fn score(&self, stored: &[f64]) -> Option<f64> {
        let dot: f64 = stored.iter().zip(&self.center).map(|(a, b)| a * b).sum();
        match self.metric {
            Metric::L2Norm => Some(
                stored
                    .iter()
                    .zip(&self.center)
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt(),
            ),
            Metric::InnerProduct => Some(dot),
            Metric::Cosine => {
                let norm = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>().sqrt();
                let denominator = norm(stored) * norm(&self.center);
                (denominator > 0.0).then(|| 1.0 - dot / denominator)
            }
        }
    }

    pub fn within(&self, score: f64, lower: Option<f64>, upper: Option<f64>) -> bool {
        lower.is_none_or(|low| score >= low) && upper.is_none_or(|high| score <= high)
    }
}

pub struct VectorSimilarityFilter<'a> {
    registry: &'a AttributeTypeRegistry,
}

impl<'a> VectorSimilarityFilter<'a> {
    pub fn new(registry: &'a AttributeTypeRegistry) -> Self {
        Self { registry }
    }

    /// Bound predicate plus the ordering term for `query`.
    pub fn compile(&self, collection: &Collection, query: &VectorQuery) -> Result<(Predicate, OrderBy)> {
        let type_id = collection.entity_type.ok_or_else(|| {
            Error::AmbiguousType(format!(
                "vector search on '{}' needs a single {} type",
                query.attribute, collection.kind
            ))
        })?;
        let entity_type = self.registry.require(type_id)?;
        let spec = entity_type
            .attribute(&query.attribute)
            .ok_or_else(|| Error::schema(&query.attribute, "unknown attribute"))?;
        if spec.dtype != Dtype::FloatArray {
            return Err(Error::schema(
                &query.attribute,
                format!("vector search needs a float_array, found '{}'", spec.dtype),
            ));
        }
        let dimensions = spec.dimensions.unwrap_or(query.center.len());
        if query.center.len() != dimensions || dimensions == 0 {
            return Err(Error::conversion(
                &query.attribute,
                format!("query vector has {} elements, expected {}", query.center.len(), dimensions),
            ));
        }
        if query.center.iter().any(|x| !x.is_finite()) {
            return Err(Error::conversion(&query.attribute, "query vector must be finite"));
        }
        let score = VectorScore {
            key: spec.name.clone(),
            dimensions,
            center: query.center.clone(),
            metric: query.metric,
        };
        let predicate = Predicate::VectorDistance {
            score: score.clone(),
            lower: query.lower_bound,
            upper: query.upper_bound,
        };
        let order = OrderBy::Vector {
            score,
            descending: query.order == SortOrder::Desc,
        };
        Ok((predicate, order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeTypeSpec, EntityKind, EntityType};

    fn registry() -> AttributeTypeRegistry {
        AttributeTypeRegistry::from_types([EntityType::new(1, 1, EntityKind::Media, "Video")
            .with_attribute(AttributeTypeSpec::new("Embedding", Dtype::FloatArray).with_dimensions(3))
            .with_attribute(AttributeTypeSpec::new("Camera", Dtype::String))])
        .unwrap()
    }

    fn score(metric: Metric) -> VectorScore {
        VectorScore {
            key: "Embedding".into(),
            dimensions: 2,
            center: vec![1.0, 0.0],
            metric,
        }
    }

    #[test]
    fn metrics() {
        assert_eq!(score(Metric::L2Norm).score(&[4.0, 4.0]), Some(5.0));
        assert_eq!(score(Metric::InnerProduct).score(&[3.0, 9.0]), Some(3.0));
        let orthogonal = score(Metric::Cosine).score(&[0.0, 2.0]).unwrap();
        assert!((orthogonal - 1.0).abs() < 1e-12);
        assert_eq!(score(Metric::Cosine).score(&[0.0, 0.0]), None);
    }

    #[test]
    fn bounds_are_inclusive() {
        let s = score(Metric::L2Norm);
        assert!(s.within(0.5, Some(0.5), Some(0.5)));
        assert!(!s.within(0.51, None, Some(0.5)));
    }

    #[test]
    fn requires_pinned_float_array_of_matching_length() {
        let registry = registry();
        let filter = VectorSimilarityFilter::new(&registry);
        let query = VectorQuery::new("Embedding", vec![0.0, 1.0, 0.0], Metric::Cosine);

        let unpinned = Collection::new(1, EntityKind::Media);
        assert!(matches!(filter.compile(&unpinned, &query), Err(Error::AmbiguousType(_))));

        let pinned = Collection::new(1, EntityKind::Media).pinned(1);
        let (predicate, order) = filter.compile(&pinned, &query).unwrap();
        assert!(matches!(predicate, Predicate::VectorDistance { .. }));
        assert!(matches!(order, OrderBy::Vector { descending: false, .. }));

        let short = VectorQuery::new("Embedding", vec![0.0, 1.0], Metric::L2Norm);
        assert!(matches!(filter.compile(&pinned, &short), Err(Error::ValueConversion { .. })));
        let wrong = VectorQuery::new("Camera", vec![0.0, 1.0, 0.0], Metric::L2Norm);
        assert!(matches!(filter.compile(&pinned, &wrong), Err(Error::Schema { .. })));
    }

    #[test]
    fn metric_names() {
        let metric: Metric = serde_json::from_str("\"inner_product\"").unwrap();
        assert_eq!(metric, Metric::InnerProduct);
        assert_eq!(serde_json::to_string(&Metric::L2Norm).unwrap(), "\"l2norm\"");
    }
}
