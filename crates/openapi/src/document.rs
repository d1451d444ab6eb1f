//! Minimal OpenAPI v3 document model — just enough structure to project
//! operations into tools and invoke them. Unknown fields are ignored.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use sw_domain::error::Error;
use sw_domain::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct OpenApiDocument {
    #[serde(default)]
    pub openapi: String,
    pub info: Info,
    #[serde(default)]
    pub servers: Vec<Server>,
    #[serde(default)]
    pub tags: Vec<TagDef>,
    #[serde(default)]
    pub paths: BTreeMap<String, PathItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Info {
    pub title: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Server {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathItem {
    pub get: Option<Operation>,
    pub put: Option<Operation>,
    pub post: Option<Operation>,
    pub delete: Option<Operation>,
    pub patch: Option<Operation>,
    /// Parameters shared by every operation on the path.
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
}

impl PathItem {
    /// The operations present on this path, with their HTTP methods.
    pub fn operations(&self) -> Vec<(&'static str, &Operation)> {
        let mut out = Vec::new();
        if let Some(op) = &self.get {
            out.push(("GET", op));
        }
        if let Some(op) = &self.put {
            out.push(("PUT", op));
        }
        if let Some(op) = &self.post {
            out.push(("POST", op));
        }
        if let Some(op) = &self.delete {
            out.push(("DELETE", op));
        }
        if let Some(op) = &self.patch {
            out.push(("PATCH", op));
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    #[serde(default)]
    pub request_body: Option<RequestBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    /// "path", "query", or "header".
    #[serde(rename = "in")]
    pub location: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub content: BTreeMap<String, MediaType>,
}

impl RequestBody {
    /// The JSON schema of the `application/json` body, if declared.
    pub fn json_schema(&self) -> Option<&Value> {
        self.content
            .get("application/json")
            .and_then(|m| m.schema.as_ref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaType {
    #[serde(default)]
    pub schema: Option<Value>,
}

impl OpenApiDocument {
    /// Parse a document from JSON or YAML text.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') {
            serde_json::from_str(text).map_err(Error::Json)
        } else {
            serde_yaml::from_str(text)
                .map_err(|e| Error::Validation(format!("OpenAPI YAML parse failed: {e}")))
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.servers.first().map(|s| s.url.as_str())
    }

    /// Tag names in declaration order, falling back to tags referenced by
    /// operations when the document declares none.
    pub fn tag_names(&self) -> Vec<String> {
        if !self.tags.is_empty() {
            return self.tags.iter().map(|t| t.name.clone()).collect();
        }
        let mut seen = Vec::new();
        for item in self.paths.values() {
            for (_, op) in item.operations() {
                for tag in &op.tags {
                    if !seen.contains(tag) {
                        seen.push(tag.clone());
                    }
                }
            }
        }
        seen
    }
}
