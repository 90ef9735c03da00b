//! OpenAPI 2.0 (Swagger) and 3.x documents.
//!
//! Both versions deserialize into typed trees that share [`PathItem`] and
//! [`Operation`]; the differences (body parameters vs `requestBody`,
//! `definitions` vs `components`) are handled by [`RefResolver`].

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::ParsedSpec;
use crate::error::{Result, SpecError};
use crate::format::SourceType;
use crate::operation::{
    EndpointOperation, HttpMethod, Parameter, ParameterLocation, merge_parameters,
};

/// `info` block shared by both versions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Info {
    pub title: Option<String>,
    pub version: Option<String>,
}

/// A Swagger 2.0 document.
#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerDoc {
    /// Unquoted YAML versions arrive as numbers.
    pub swagger: Value,
    #[serde(default)]
    pub info: Info,
    pub host: Option<String>,
    #[serde(rename = "basePath")]
    pub base_path: Option<String>,
    #[serde(default)]
    pub schemes: Vec<String>,
    pub paths: Option<IndexMap<String, PathItem>>,
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterObject>,
    #[serde(default)]
    pub definitions: IndexMap<String, Value>,
}

/// An OpenAPI 3.x document.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenApiDoc {
    pub openapi: Value,
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub servers: Vec<Server>,
    pub paths: Option<IndexMap<String, PathItem>>,
    #[serde(default)]
    pub components: Components,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Components {
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterObject>,
    #[serde(default)]
    pub schemas: IndexMap<String, Value>,
    #[serde(default, rename = "requestBodies")]
    pub request_bodies: IndexMap<String, RequestBody>,
}

/// Either an inline object or a `$ref` pointer to one.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RefOr<T> {
    Ref {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Item(T),
}

/// Operations under one path template, in declaration order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(try_from = "RawPathItem")]
pub struct PathItem {
    pub parameters: Vec<RefOr<ParameterObject>>,
    operations: Vec<(HttpMethod, Operation)>,
}

/// Wire form of [`PathItem`]; method keys stay in document order.
#[derive(Deserialize)]
struct RawPathItem {
    #[serde(default)]
    parameters: Vec<RefOr<ParameterObject>>,
    #[serde(flatten)]
    rest: IndexMap<String, Value>,
}

impl TryFrom<RawPathItem> for PathItem {
    type Error = String;

    fn try_from(raw: RawPathItem) -> std::result::Result<Self, Self::Error> {
        let mut operations = Vec::new();
        for (key, value) in raw.rest {
            // `summary`, `servers`, `x-*` and friends are not operations.
            let Ok(method) = key.parse::<HttpMethod>() else {
                continue;
            };
            let operation = serde_json::from_value(value)
                .map_err(|e| format!("invalid {method} operation: {e}"))?;
            operations.push((method, operation));
        }
        Ok(Self {
            parameters: raw.parameters,
            operations,
        })
    }
}

impl PathItem {
    /// Declared operations in document order.
    pub fn operations(&self) -> impl Iterator<Item = (HttpMethod, &Operation)> + '_ {
        self.operations.iter().map(|(method, op)| (*method, op))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Operation {
    pub summary: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "operationId")]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<RefOr<ParameterObject>>,
    #[serde(rename = "requestBody")]
    pub request_body: Option<RefOr<RequestBody>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterObject {
    pub name: String,
    #[serde(rename = "in")]
    pub location: String,
    #[serde(default)]
    pub required: bool,
    /// 2.0 carries the type inline.
    #[serde(rename = "type")]
    pub param_type: Option<String>,
    /// 3.x carries it in a schema; 2.0 body parameters carry their schema here.
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaType {
    pub schema: Option<Value>,
}

/// Resolves local `$ref` pointers for one document.
struct RefResolver<'a> {
    parameters: &'a IndexMap<String, ParameterObject>,
    parameter_prefix: &'static str,
    schemas: &'a IndexMap<String, Value>,
    schema_prefix: &'static str,
    request_bodies: Option<&'a IndexMap<String, RequestBody>>,
}

impl<'a> RefResolver<'a> {
    fn parameter<'p>(&self, param: &'p RefOr<ParameterObject>) -> Option<&'p ParameterObject>
    where
        'a: 'p,
    {
        match param {
            RefOr::Item(item) => Some(item),
            RefOr::Ref { reference } => {
                let resolved = reference
                    .strip_prefix(self.parameter_prefix)
                    .and_then(|name| self.parameters.get(name));
                if resolved.is_none() {
                    warn!(reference = %reference, "unresolved parameter reference");
                }
                resolved
            }
        }
    }

    fn request_body<'b>(&self, body: &'b RefOr<RequestBody>) -> Option<&'b RequestBody>
    where
        'a: 'b,
    {
        match body {
            RefOr::Item(item) => Some(item),
            RefOr::Ref { reference } => reference
                .strip_prefix("#/components/requestBodies/")
                .and_then(|name| self.request_bodies?.get(name)),
        }
    }

    /// Follow a schema-level `$ref` one step.
    fn schema(&self, schema: &Value) -> Value {
        match schema.get("$ref").and_then(Value::as_str) {
            Some(reference) => reference
                .strip_prefix(self.schema_prefix)
                .and_then(|name| self.schemas.get(name))
                .cloned()
                .unwrap_or_else(|| schema.clone()),
            None => schema.clone(),
        }
    }

    /// Top-level property names of a body schema, including `allOf` parts.
    fn body_fields(&self, schema: &Value) -> Vec<String> {
        let schema = self.schema(schema);
        let mut fields: Vec<String> = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default();

        if let Some(parts) = schema.get("allOf").and_then(Value::as_array) {
            for part in parts {
                let part = self.schema(part);
                if let Some(props) = part.get("properties").and_then(Value::as_object) {
                    for key in props.keys() {
                        if !fields.contains(key) {
                            fields.push(key.clone());
                        }
                    }
                }
            }
        }
        fields
    }

    fn convert(&self, param: &ParameterObject) -> Option<Parameter> {
        let location = ParameterLocation::from_openapi(&param.location)?;
        let param_type = param.param_type.clone().or_else(|| {
            param
                .schema
                .as_ref()
                .map(|s| self.schema(s))
                .and_then(|s| s.get("type").and_then(Value::as_str).map(str::to_string))
        });
        let mut converted = Parameter::new(&param.name, location).required(param.required);
        converted.param_type = param_type;
        Some(converted)
    }
}

impl SwaggerDoc {
    pub fn normalize(&self) -> Result<ParsedSpec> {
        let paths = self
            .paths
            .as_ref()
            .ok_or_else(|| SpecError::malformed("swagger document has no `paths` object"))?;
        let resolver = RefResolver {
            parameters: &self.parameters,
            parameter_prefix: "#/parameters/",
            schemas: &self.definitions,
            schema_prefix: "#/definitions/",
            request_bodies: None,
        };

        Ok(ParsedSpec {
            source_type: SourceType::OpenApi2,
            title: self.info.title.clone(),
            version: self.info.version.clone(),
            base_url: self.base_url(),
            operations: walk_paths(paths, &resolver),
        })
    }

    fn base_url(&self) -> Option<String> {
        let base_path = self.base_path.as_deref().unwrap_or("");
        match &self.host {
            Some(host) => {
                let scheme = self.schemes.first().map(String::as_str).unwrap_or("https");
                Some(format!("{scheme}://{host}{base_path}"))
            }
            None if !base_path.is_empty() => Some(base_path.to_string()),
            None => None,
        }
    }
}

impl OpenApiDoc {
    pub fn normalize(&self) -> Result<ParsedSpec> {
        let paths = self
            .paths
            .as_ref()
            .ok_or_else(|| SpecError::malformed("openapi document has no `paths` object"))?;
        let resolver = RefResolver {
            parameters: &self.components.parameters,
            parameter_prefix: "#/components/parameters/",
            schemas: &self.components.schemas,
            schema_prefix: "#/components/schemas/",
            request_bodies: Some(&self.components.request_bodies),
        };

        Ok(ParsedSpec {
            source_type: SourceType::OpenApi3,
            title: self.info.title.clone(),
            version: self.info.version.clone(),
            base_url: self.servers.first().map(|s| s.url.clone()),
            operations: walk_paths(paths, &resolver),
        })
    }
}

fn walk_paths(paths: &IndexMap<String, PathItem>, resolver: &RefResolver<'_>) -> Vec<EndpointOperation> {
    let mut operations = Vec::new();

    for (path, item) in paths {
        let path_params: Vec<&ParameterObject> = item
            .parameters
            .iter()
            .filter_map(|p| resolver.parameter(p))
            .collect();

        for (method, op) in item.operations() {
            let op_params: Vec<&ParameterObject> = op
                .parameters
                .iter()
                .filter_map(|p| resolver.parameter(p))
                .collect();

            let mut endpoint = EndpointOperation::new(method, path.as_str())
                .with_summary(op.summary.as_deref());
            endpoint.description = op.description.clone();
            endpoint.operation_id = op.operation_id.clone();
            endpoint.tags = op.tags.iter().cloned().collect();
            endpoint.parameters = merge_parameters(
                path_params.iter().filter_map(|p| resolver.convert(p)).collect(),
                op_params.iter().filter_map(|p| resolver.convert(p)).collect(),
            );

            // 2.0 body parameter, operation-level first.
            let body_param = op_params
                .iter()
                .chain(path_params.iter())
                .find(|p| p.location == "body")
                .and_then(|p| p.schema.as_ref());
            let body_schema = match body_param {
                Some(schema) => Some(schema.clone()),
                None => op
                    .request_body
                    .as_ref()
                    .and_then(|b| resolver.request_body(b))
                    .and_then(json_schema),
            };
            if let Some(schema) = body_schema {
                endpoint.body_fields = resolver.body_fields(&schema);
                endpoint.request_body_schema = Some(resolver.schema(&schema));
            }

            debug!(method = %method, path = %path, "parsed openapi operation");
            operations.push(endpoint);
        }
    }

    operations
}

/// Prefer the JSON media type, else the first declared one.
fn json_schema(body: &RequestBody) -> Option<Value> {
    body.content
        .iter()
        .find(|(media, _)| media.starts_with("application/json"))
        .or_else(|| body.content.first())
        .and_then(|(_, media)| media.schema.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn swagger(value: Value) -> SwaggerDoc {
        serde_json::from_value(value).unwrap()
    }

    fn openapi(value: Value) -> OpenApiDoc {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_swagger_body_parameter_becomes_schema() {
        let doc = swagger(json!({
            "swagger": "2.0",
            "host": "petstore.swagger.io",
            "basePath": "/v2",
            "schemes": ["https"],
            "paths": {
                "/pet": {
                    "post": {
                        "summary": "Add a new pet to the store",
                        "parameters": [
                            { "in": "body", "name": "body", "required": true,
                              "schema": { "$ref": "#/definitions/Pet" } }
                        ]
                    }
                }
            },
            "definitions": {
                "Pet": { "type": "object", "properties": { "name": {}, "photoUrls": {} } }
            }
        }));

        let output = doc.normalize().unwrap();
        assert_eq!(output.base_url.as_deref(), Some("https://petstore.swagger.io/v2"));
        let op = &output.operations[0];
        assert!(op.parameters.is_empty());
        assert_eq!(op.body_fields, vec!["name", "photoUrls"]);
        assert!(op.request_body_schema.is_some());
    }

    #[test]
    fn test_openapi3_refs_and_merge() {
        let doc = openapi(json!({
            "openapi": "3.0.3",
            "servers": [{ "url": "https://api.example.com/v1" }],
            "paths": {
                "/users/{id}": {
                    "parameters": [
                        { "$ref": "#/components/parameters/UserId" },
                        { "name": "verbose", "in": "query", "schema": { "type": "boolean" } }
                    ],
                    "get": {
                        "parameters": [
                            { "name": "verbose", "in": "query", "required": true,
                              "schema": { "type": "string" } }
                        ]
                    },
                    "put": {
                        "summary": "Update a user",
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/User" }
                                }
                            }
                        }
                    }
                }
            },
            "components": {
                "parameters": {
                    "UserId": { "name": "id", "in": "path", "required": true,
                                "schema": { "type": "integer" } }
                },
                "schemas": {
                    "User": { "properties": { "email": {}, "name": {} } }
                }
            }
        }));

        let output = doc.normalize().unwrap();
        assert_eq!(output.operations.len(), 2);

        let get = &output.operations[0];
        assert_eq!(get.method, HttpMethod::Get);
        assert_eq!(get.summary, "GET /users/{id}");
        assert_eq!(get.parameter_names(), vec!["id", "verbose"]);
        assert!(get.parameters[1].required);
        assert_eq!(get.parameters[1].param_type.as_deref(), Some("string"));
        assert_eq!(get.parameters[0].param_type.as_deref(), Some("integer"));

        let put = &output.operations[1];
        assert_eq!(put.body_fields, vec!["email", "name"]);
    }

    #[test]
    fn test_missing_paths_is_malformed() {
        let doc = openapi(json!({ "openapi": "3.1.0", "info": { "title": "Empty" } }));
        assert!(matches!(doc.normalize(), Err(SpecError::MalformedSpec(_))));
    }

    #[test]
    fn test_operations_keep_declaration_order() {
        let doc = openapi(json!({
            "openapi": "3.0.3",
            "paths": {
                "/items/{id}": {
                    "summary": "One item",
                    "patch": { "summary": "Patch it" },
                    "x-internal": true,
                    "delete": { "summary": "Drop it" },
                    "get": { "summary": "Read it" }
                }
            }
        }));

        let endpoints: Vec<String> = doc
            .normalize()
            .unwrap()
            .operations
            .iter()
            .map(|op| format!("{} {}", op.method, op.summary))
            .collect();
        assert_eq!(endpoints, vec!["PATCH Patch it", "DELETE Drop it", "GET Read it"]);
    }

    #[test]
    fn test_invalid_operation_fails_to_deserialize() {
        let result: std::result::Result<OpenApiDoc, _> = serde_json::from_value(json!({
            "openapi": "3.0.3",
            "paths": { "/a": { "get": { "tags": "not-a-list" } } }
        }));
        assert!(result.is_err());
    }
}
