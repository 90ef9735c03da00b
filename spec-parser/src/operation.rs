//! Format-neutral endpoint model.
//!
//! Every parser normalizes into [`EndpointOperation`]; nothing downstream
//! knows which format an operation came from.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// HTTP methods an operation can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
    Options,
    Head,
    Patch,
    Trace,
}

impl HttpMethod {
    /// Every method, in OpenAPI path-item field order.
    pub const ALL: [HttpMethod; 8] = [
        Self::Get,
        Self::Put,
        Self::Post,
        Self::Delete,
        Self::Options,
        Self::Head,
        Self::Patch,
        Self::Trace,
    ];

    /// Upper-case wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
            Self::Trace => "TRACE",
        }
    }

    /// Whether requests with this method conventionally carry a JSON body.
    pub fn has_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown HTTP method: {s}"))
    }
}

/// Where a parameter is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
    /// OpenAPI 2 form fields and Postman urlencoded/form-data bodies.
    FormData,
}

impl ParameterLocation {
    /// Map an OpenAPI `in` value. `body` is not a parameter location here.
    pub fn from_openapi(value: &str) -> Option<Self> {
        match value {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "cookie" => Some(Self::Cookie),
            "formData" => Some(Self::FormData),
            _ => None,
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    /// Declared schema type (`string`, `integer`, ...), when known.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub param_type: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, location: ParameterLocation) -> Self {
        Self {
            name: name.into(),
            // Path parameters are always required.
            required: location == ParameterLocation::Path,
            location,
            param_type: None,
        }
    }

    pub fn with_type(mut self, param_type: impl Into<String>) -> Self {
        self.param_type = Some(param_type.into());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required || self.location == ParameterLocation::Path;
        self
    }
}

/// A single API operation, normalized from any supported format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointOperation {
    pub method: HttpMethod,

    /// Path template with `{param}` placeholders.
    pub path: String,

    /// Short summary; `"{METHOD} {path}"` when the source has none.
    pub summary: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,

    /// Parameters in declaration order.
    pub parameters: Vec<Parameter>,

    /// Request body schema with top-level `$ref` resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body_schema: Option<serde_json::Value>,

    /// Top-level field names of the request body.
    #[serde(default)]
    pub body_fields: Vec<String>,

    pub tags: BTreeSet<String>,
}

impl EndpointOperation {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            summary: default_summary(method, &path),
            method,
            path,
            description: None,
            operation_id: None,
            parameters: Vec::new(),
            request_body_schema: None,
            body_fields: Vec::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Set the summary, keeping the default when `summary` is blank.
    pub fn with_summary(mut self, summary: Option<&str>) -> Self {
        if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
            self.summary = summary.to_string();
        }
        self
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }
}

/// Fallback summary for operations that declare none.
pub fn default_summary(method: HttpMethod, path: &str) -> String {
    format!("{method} {path}")
}

/// Merge operation-level parameters over path-level ones.
///
/// An operation parameter with the same `name` and `location` as a path-level
/// one replaces it in place; others are appended in order.
pub fn merge_parameters(path_level: Vec<Parameter>, operation_level: Vec<Parameter>) -> Vec<Parameter> {
    let mut merged = path_level;
    for param in operation_level {
        match merged
            .iter_mut()
            .find(|p| p.name == param.name && p.location == param.location)
        {
            Some(existing) => *existing = param,
            None => merged.push(param),
        }
    }
    merged
}
