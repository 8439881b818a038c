use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Tunables shared by every compile path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Splits `key<sep>value` in flat filter parameters.
    pub separator: String,
    pub max_query_depth: usize,
    /// Applied when a search request carries no explicit limit.
    pub default_limit: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            separator: "::".to_string(),
            max_query_depth: 32,
            default_limit: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(value: Value) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_value(value).map_err(|e| Error::Deserialize(e.to_string()))?;
        if config.separator.is_empty() {
            return Err(Error::Deserialize("separator must not be empty".to_string()));
        }
        Ok(config)
    }
}
