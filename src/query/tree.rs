use std::fmt::Display;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    And,
    Or,
    Not,
}

impl Method {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "and" => Ok(Method::And),
            "or" => Ok(Method::Or),
            "not" => Ok(Method::Not),
            _ => Err(Error::QueryShape(format!("unknown method '{}'", s))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::And => "and",
            Method::Or => "or",
            Method::Not => "not",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub attribute: String,
    /// `[date_|distance_]<op>`.
    pub operation: String,
    pub value: Value,
    pub inverse: bool,
}

/// A recursive boolean query. Shape is checked on construction, so a NOT
/// node always has exactly one child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum QueryNode {
    Combinator { method: Method, operations: Vec<QueryNode> },
    Leaf(Leaf),
}

impl QueryNode {
    pub fn leaf(attribute: impl Into<String>, operation: impl Into<String>, value: Value) -> Self {
        QueryNode::Leaf(Leaf {
            attribute: attribute.into(),
            operation: operation.into(),
            value,
            inverse: false,
        })
    }

    pub fn and(operations: Vec<QueryNode>) -> Self {
        QueryNode::Combinator {
            method: Method::And,
            operations,
        }
    }

    pub fn or(operations: Vec<QueryNode>) -> Self {
        QueryNode::Combinator {
            method: Method::Or,
            operations,
        }
    }

    pub fn not(operation: QueryNode) -> Self {
        QueryNode::Combinator {
            method: Method::Not,
            operations: vec![operation],
        }
    }

    /// Sets `inverse` on a leaf; combinators are wrapped in NOT.
    pub fn inverted(self) -> Self {
        match self {
            QueryNode::Leaf(mut leaf) => {
                leaf.inverse = !leaf.inverse;
                QueryNode::Leaf(leaf)
            }
            other => QueryNode::not(other),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            QueryNode::Leaf(_) => 1,
            QueryNode::Combinator { operations, .. } => {
                1 + operations.iter().map(QueryNode::depth).max().unwrap_or(0)
            }
        }
    }

    pub fn leaves(&self) -> Vec<&Leaf> {
        match self {
            QueryNode::Leaf(leaf) => vec![leaf],
            QueryNode::Combinator { operations, .. } => operations.iter().flat_map(QueryNode::leaves).collect(),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(object) = value else {
            return Err(Error::QueryShape(format!("expected an object, got {}", value)));
        };
        if let Some(method) = object.get("method") {
            let method = method
                .as_str()
                .ok_or_else(|| Error::QueryShape("method must be a string".to_string()))
                .and_then(Method::parse)?;
            let operations = match object.get("operations") {
                Some(Value::Array(items)) => items.iter().map(Self::from_json).collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
                Some(other) => {
                    return Err(Error::QueryShape(format!("operations must be a list, got {}", other)));
                }
            };
            if method == Method::Not && operations.len() != 1 {
                return Err(Error::QueryShape(format!(
                    "not takes exactly one operation, got {}",
                    operations.len()
                )));
            }
            return Ok(QueryNode::Combinator { method, operations });
        }
        let field = |name: &str| -> Result<String> {
            object
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::QueryShape(format!("leaf is missing '{}'", name)))
        };
        let inverse = match object.get("inverse") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(Error::QueryShape(format!("inverse must be a bool, got {}", other)));
            }
        };
        Ok(QueryNode::Leaf(Leaf {
            attribute: field("attribute")?,
            operation: field("operation")?,
            value: object.get("value").cloned().unwrap_or(Value::Null),
            inverse,
        }))
    }

    /// Accepts inline JSON or base64-encoded JSON (standard or URL-safe alphabet).
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.starts_with('{') {
            let value: Value = serde_json::from_str(text).map_err(|e| Error::QueryShape(e.to_string()))?;
            return Self::from_json(&value);
        }
        Self::from_base64(text)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .or_else(|_| URL_SAFE.decode(encoded))
            .map_err(|e| Error::QueryShape(format!("invalid base64 query: {}", e)))?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|e| Error::QueryShape(e.to_string()))?;
        Self::from_json(&value)
    }

    pub fn to_json(&self) -> Value {
        match self {
            QueryNode::Combinator { method, operations } => json!({
                "method": method.as_str(),
                "operations": operations.iter().map(QueryNode::to_json).collect::<Vec<_>>(),
            }),
            QueryNode::Leaf(leaf) => {
                let mut object = Map::new();
                object.insert("attribute".into(), Value::String(leaf.attribute.clone()));
                object.insert("operation".into(), Value::String(leaf.operation.clone()));
                object.insert("value".into(), leaf.value.clone());
                if leaf.inverse {
                    object.insert("inverse".into(), Value::Bool(true));
                }
                Value::Object(object)
            }
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_json().to_string())
    }
}

impl TryFrom<Value> for QueryNode {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        QueryNode::from_json(&value)
    }
}

impl From<QueryNode> for Value {
    fn from(node: QueryNode) -> Self {
        node.to_json()
    }
}
