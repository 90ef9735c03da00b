//! Postman collections (v2.0 / v2.1).

use indexmap::IndexSet;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::ParsedSpec;
use crate::error::Result;
use crate::format::SourceType;
use crate::operation::{
    EndpointOperation, HttpMethod, Parameter, ParameterLocation, default_summary,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Collection {
    #[serde(default)]
    pub info: CollectionInfo,
    pub item: Vec<Item>,
    #[serde(default)]
    pub variable: Vec<Variable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionInfo {
    pub name: Option<String>,
    pub version: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Variable {
    pub key: Option<String>,
    pub value: Option<Value>,
}

/// A folder (has `item`) or a request (has `request`).
#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub name: Option<String>,
    pub item: Option<Vec<Item>>,
    pub request: Option<RequestField>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RequestField {
    Url(String),
    Request(Request),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    pub method: Option<String>,
    pub url: Option<UrlField>,
    #[serde(default)]
    pub header: Vec<KeyValue>,
    pub body: Option<Body>,
    pub description: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UrlField {
    Raw(String),
    Structured(Url),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Url {
    pub raw: Option<String>,
    pub path: Option<PathField>,
    #[serde(default)]
    pub query: Vec<KeyValue>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PathField {
    Segments(Vec<Segment>),
    Joined(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Text(String),
    Object { value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyValue {
    pub key: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Body {
    pub mode: Option<String>,
    pub raw: Option<String>,
    #[serde(default)]
    pub urlencoded: Vec<KeyValue>,
    #[serde(default)]
    pub formdata: Vec<KeyValue>,
}

impl Collection {
    pub fn normalize(&self) -> Result<ParsedSpec> {
        let mut operations = Vec::new();
        let mut folders = Vec::new();
        flatten(&self.item, &mut folders, &mut operations);

        Ok(ParsedSpec {
            source_type: SourceType::Postman,
            title: self.info.name.clone(),
            version: self.info.version.as_ref().map(value_text),
            base_url: self.base_url(),
            operations,
        })
    }

    /// `baseUrl` collection variable, else the origin of the first absolute
    /// request URL.
    fn base_url(&self) -> Option<String> {
        let from_variable = self
            .variable
            .iter()
            .find(|v| matches!(v.key.as_deref(), Some("baseUrl" | "base_url")))
            .and_then(|v| v.value.as_ref())
            .map(value_text)
            .filter(|v| !v.is_empty());
        if from_variable.is_some() {
            return from_variable;
        }

        let mut stack: Vec<&Item> = self.item.iter().rev().collect();
        while let Some(item) = stack.pop() {
            if let Some(children) = &item.item {
                stack.extend(children.iter().rev());
                continue;
            }
            let raw = match &item.request {
                Some(RequestField::Url(raw)) => Some(raw.as_str()),
                Some(RequestField::Request(request)) => match &request.url {
                    Some(UrlField::Raw(raw)) => Some(raw.as_str()),
                    Some(UrlField::Structured(url)) => url.raw.as_deref(),
                    None => None,
                },
                None => None,
            };
            if let Some(parsed) = raw.and_then(|r| url::Url::parse(r).ok()) {
                if parsed.has_host() {
                    return Some(parsed.origin().ascii_serialization());
                }
            }
        }
        None
    }
}

fn flatten(items: &[Item], folders: &mut Vec<String>, out: &mut Vec<EndpointOperation>) {
    for item in items {
        if let Some(children) = &item.item {
            let pushed = match item.name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => {
                    folders.push(name.to_string());
                    true
                }
                _ => false,
            };
            flatten(children, folders, out);
            if pushed {
                folders.pop();
            }
            continue;
        }

        let Some(request) = &item.request else {
            debug!(name = ?item.name, "skipping postman item without request");
            continue;
        };
        if let Some(op) = convert(item.name.as_deref(), request, folders) {
            out.push(op);
        }
    }
}

fn convert(name: Option<&str>, request: &RequestField, folders: &[String]) -> Option<EndpointOperation> {
    let owned;
    let request = match request {
        RequestField::Request(request) => request,
        RequestField::Url(raw) => {
            owned = Request {
                url: Some(UrlField::Raw(raw.clone())),
                ..Request::default()
            };
            &owned
        }
    };

    let method = match request.method.as_deref() {
        None => HttpMethod::Get,
        Some(verb) => match verb.parse::<HttpMethod>() {
            Ok(method) => method,
            Err(e) => {
                warn!(name = ?name, "skipping postman request: {e}");
                return None;
            }
        },
    };

    let (segments, query_keys) = match &request.url {
        Some(UrlField::Raw(raw)) => split_raw(raw),
        Some(UrlField::Structured(url)) => {
            let (raw_segments, raw_query) = url.raw.as_deref().map(split_raw).unwrap_or_default();
            let segments = match &url.path {
                Some(PathField::Segments(parts)) => parts
                    .iter()
                    .map(|s| match s {
                        Segment::Text(text) => text.clone(),
                        Segment::Object { value } => value.clone(),
                    })
                    .collect(),
                Some(PathField::Joined(joined)) => path_segments(joined),
                None => raw_segments,
            };
            let query = if url.query.is_empty() {
                raw_query
            } else {
                enabled_keys(&url.query)
            };
            (segments, query)
        }
        None => (Vec::new(), Vec::new()),
    };

    let mut parameters = Vec::new();
    let mut normalized = Vec::new();
    for segment in segments.iter().filter(|s| !s.is_empty()) {
        match path_variable(segment) {
            Some(var) => {
                normalized.push(format!("{{{var}}}"));
                parameters.push(Parameter::new(var, ParameterLocation::Path));
            }
            None => normalized.push(segment.clone()),
        }
    }
    let path = format!("/{}", normalized.join("/"));

    let query_keys: IndexSet<String> = query_keys.into_iter().collect();
    parameters.extend(
        query_keys
            .into_iter()
            .map(|key| Parameter::new(key, ParameterLocation::Query)),
    );
    parameters.extend(
        enabled_keys(&request.header)
            .into_iter()
            .map(|key| Parameter::new(key, ParameterLocation::Header)),
    );

    let mut body_fields = Vec::new();
    if let Some(body) = &request.body {
        match body.mode.as_deref() {
            Some("urlencoded") => parameters.extend(
                enabled_keys(&body.urlencoded)
                    .into_iter()
                    .map(|key| Parameter::new(key, ParameterLocation::FormData)),
            ),
            Some("formdata") => parameters.extend(
                enabled_keys(&body.formdata)
                    .into_iter()
                    .map(|key| Parameter::new(key, ParameterLocation::FormData)),
            ),
            Some("raw") => {
                if let Some(Value::Object(fields)) = body
                    .raw
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                {
                    body_fields = fields.keys().cloned().collect();
                }
            }
            _ => {}
        }
    }

    let summary = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_summary(method, &path));

    let mut op = EndpointOperation::new(method, path);
    op.summary = summary;
    op.description = request.description.as_ref().and_then(description_text);
    op.parameters = parameters;
    op.body_fields = body_fields;
    op.tags = folders.iter().cloned().collect();

    debug!(method = %op.method, path = %op.path, "parsed postman request");
    Some(op)
}

/// Split a raw URL into path segments and query keys.
fn split_raw(raw: &str) -> (Vec<String>, Vec<String>) {
    let (before_query, query) = match raw.split_once('?') {
        Some((before, query)) => (before, Some(query)),
        None => (raw, None),
    };

    let path = if before_query.contains("{{") {
        strip_origin(before_query)
    } else {
        match url::Url::parse(before_query) {
            Ok(parsed) if parsed.has_host() => parsed.path().to_string(),
            _ => strip_origin(before_query),
        }
    };

    let query_keys = query
        .map(|q| {
            q.split('&')
                .filter_map(|pair| pair.split('=').next())
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    (path_segments(&path), query_keys)
}

/// Drop a `scheme://host` or leading `{{host}}` variable from a raw URL.
fn strip_origin(raw: &str) -> String {
    let rest = match raw.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |i| &rest[i..]),
        None if raw.starts_with("{{") => match raw.find("}}") {
            Some(end) => &raw[end + 2..],
            None => raw,
        },
        None => raw,
    };
    rest.to_string()
}

fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `:id` or `{{id}}` segments name a path variable.
fn path_variable(segment: &str) -> Option<&str> {
    if let Some(name) = segment.strip_prefix(':') {
        return Some(name).filter(|n| !n.is_empty());
    }
    segment
        .strip_prefix("{{")
        .and_then(|s| s.strip_suffix("}}"))
        .filter(|n| !n.is_empty())
}

fn enabled_keys(pairs: &[KeyValue]) -> Vec<String> {
    pairs
        .iter()
        .filter(|kv| !kv.disabled)
        .filter_map(|kv| kv.key.as_deref())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
        .collect()
}

fn description_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("content").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
