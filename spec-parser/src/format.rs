//! Syntax and shape detection.
//!
//! Raw bytes are tried as JSON first and YAML second; the resulting tree is
//! then sniffed (or taken at its declared format) and deserialized into one of
//! the closed [`RawSpec`] variants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SpecError};
use crate::openapi::{OpenApiDoc, SwaggerDoc};
use crate::postman::Collection;

/// Specification family a document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceType {
    /// Swagger / OpenAPI 2.x.
    #[serde(rename = "swagger")]
    OpenApi2,
    /// OpenAPI 3.x.
    #[serde(rename = "openapi")]
    OpenApi3,
    #[serde(rename = "postman")]
    Postman,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenApi2 => "swagger",
            Self::OpenApi3 => "openapi",
            Self::Postman => "postman",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "swagger" | "openapi2" | "openapi-2" => Ok(Self::OpenApi2),
            "openapi" | "openapi3" | "openapi-3" => Ok(Self::OpenApi3),
            "postman" => Ok(Self::Postman),
            other => Err(SpecError::unsupported(format!("unknown source type `{other}`"))),
        }
    }
}

/// A document deserialized into its format's typed tree.
#[derive(Debug, Clone)]
pub enum RawSpec {
    OpenApi2(SwaggerDoc),
    OpenApi3(OpenApiDoc),
    Postman(Collection),
}

impl RawSpec {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::OpenApi2(_) => SourceType::OpenApi2,
            Self::OpenApi3(_) => SourceType::OpenApi3,
            Self::Postman(_) => SourceType::Postman,
        }
    }

    /// Decode `raw`, then interpret it as `declared` or the sniffed format.
    pub fn from_bytes(raw: &[u8], declared: Option<SourceType>) -> Result<Self> {
        let tree = parse_tree(raw)?;
        let source_type = match declared {
            Some(source_type) => source_type,
            None => sniff(&tree)?,
        };
        debug!(%source_type, declared = declared.is_some(), "detected specification format");
        Self::from_tree(tree, source_type)
    }

    fn from_tree(tree: Value, source_type: SourceType) -> Result<Self> {
        if !tree.is_object() {
            return Err(SpecError::unsupported("top-level value is not an object"));
        }
        if source_type == SourceType::Postman
            && !tree.get("item").is_some_and(Value::is_array)
        {
            return Err(SpecError::malformed("postman collection has no `item` array"));
        }

        let invalid = |e: serde_json::Error| {
            SpecError::malformed(format!("invalid {source_type} document: {e}"))
        };
        Ok(match source_type {
            SourceType::OpenApi2 => Self::OpenApi2(serde_json::from_value(tree).map_err(invalid)?),
            SourceType::OpenApi3 => Self::OpenApi3(serde_json::from_value(tree).map_err(invalid)?),
            SourceType::Postman => Self::Postman(serde_json::from_value(tree).map_err(invalid)?),
        })
    }
}

/// Decode bytes as JSON, falling back to YAML.
pub fn parse_tree(raw: &[u8]) -> Result<Value> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(value) => Ok(value),
        Err(json_err) => {
            let yaml: serde_yaml::Value = serde_yaml::from_slice(raw).map_err(|yaml_err| {
                SpecError::unsupported(format!(
                    "neither JSON ({json_err}) nor YAML ({yaml_err})"
                ))
            })?;
            Ok(yaml_to_json(yaml))
        }
    }
}

/// Convert a YAML tree to JSON, stringifying non-string keys such as the
/// integer status codes under `responses`.
fn yaml_to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;

    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(Value::Null, Value::Number)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Yaml::Mapping(map) => Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| yaml_key(k).map(|k| (k, yaml_to_json(v))))
                .collect(),
        ),
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Some(s),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Identify the format from top-level keys.
fn sniff(tree: &Value) -> Result<SourceType> {
    let Some(object) = tree.as_object() else {
        return Err(SpecError::unsupported("top-level value is not an object"));
    };

    let version = |key: &str| -> Option<String> {
        object.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    };

    if let Some(v) = version("swagger") {
        return if v.starts_with('2') {
            Ok(SourceType::OpenApi2)
        } else {
            Err(SpecError::unsupported(format!("swagger version {v}")))
        };
    }
    if let Some(v) = version("openapi") {
        return if v.starts_with('3') {
            Ok(SourceType::OpenApi3)
        } else {
            Err(SpecError::unsupported(format!("openapi version {v}")))
        };
    }
    if object.contains_key("info") && object.contains_key("item") {
        return Ok(SourceType::Postman);
    }

    Err(SpecError::unsupported(
        "expected `swagger`, `openapi`, or a postman `info` + `item` object",
    ))
}
