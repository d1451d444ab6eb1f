//! Tool records, definitions, toolsets, and the `Tool` / `ToolProvider`
//! capability traits implemented by every tool backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::run::RunConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool call / result records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool invocation requested by the model.
///
/// `arguments` is kept as the raw JSON text the model emitted; parsing is
/// the executor's responsibility so that byte-identity with the stream is
/// preserved in persisted messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// The outcome of executing one tool. Tools never propagate errors across
/// this boundary; failures become `success == false` records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metadata: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Failure with a machine-readable marker in metadata (e.g.
    /// `tool_not_found`, `validation_error`).
    pub fn fail_marked(error: impl Into<String>, marker: &str) -> Self {
        let mut meta = BTreeMap::new();
        meta.insert("error_name".to_string(), Value::String(marker.to_string()));
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            metadata: Some(meta),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value);
        self
    }

    /// Read a metadata entry by key.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One named parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    /// JSON-schema type name ("string", "integer", "object", ...).
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    /// Full schema for the parameter when the type name alone is not enough.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    /// Render the parameter list as a JSON-schema object, the shape every
    /// provider wire format wants.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let schema = p.schema.clone().unwrap_or_else(|| {
                serde_json::json!({ "type": p.kind, "description": p.description })
            });
            properties.insert(p.name.clone(), schema);
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-invocation context handed to tools. Carries the run configuration so
/// tools can read request-scoped state (notably per-provider auth
/// overrides).
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub run_id: Uuid,
    pub thread_id: Uuid,
    pub config: Arc<RunConfig>,
}

/// A callable tool. Implementations must be safe to invoke from multiple
/// runs in parallel; per-run state travels in the [`ToolContext`].
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

/// A source of tools offered to one agent run.
#[async_trait::async_trait]
pub trait ToolProvider: Send + Sync {
    /// Perform any deferred setup (e.g. parsing an OpenAPI document).
    /// Idempotent.
    async fn ensure_initialized(&self) -> Result<()>;

    fn tools(&self) -> Vec<Arc<dyn Tool>>;

    fn tool(&self, name: &str) -> Option<Arc<dyn Tool>>;

    /// Grouping tags advertised by the source (OpenAPI tags), if any.
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    fn tools_with_tag(&self, _tag: &str) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Names of tools that are not backed by a source operation (escape
    /// hatches, helpers). Used when oversized toolsets are split.
    fn auxiliary_tool_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Human title of the backing API, if known.
    fn title(&self) -> Option<String> {
        None
    }

    fn base_url(&self) -> Option<String> {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Toolsets
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Provenance and grouping metadata attached to a toolset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsetMetadata {
    pub source_id: String,
    pub provider_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_group: Option<String>,
    /// Extra per-set annotations (split reasons, model used, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, Value>,
}

/// A named, bounded collection of tools that can be offered to one agent.
/// Shared read-only across runs.
#[derive(Clone)]
pub struct ToolSet {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tools: Vec<Arc<dyn Tool>>,
    pub metadata: ToolsetMetadata,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl ToolSet {
    /// Tool names in definition order.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.definition().name).collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Name sanitization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Maximum length of a tool or toolset identifier.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Sanitize an identifier into the tool-name grammar
/// `[A-Za-z0-9_-]{1,64}`. Every other character becomes an underscore;
/// the result is truncated; empty inputs become `unnamed_id`.
/// Idempotent: sanitizing a sanitized name is a no-op.
pub fn sanitize_tool_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(MAX_TOOL_NAME_LEN);
    if out.is_empty() {
        "unnamed_id".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_passthrough() {
        assert_eq!(sanitize_tool_name("getPetById"), "getPetById");
        assert_eq!(sanitize_tool_name("get-pet_by-id2"), "get-pet_by-id2");
    }

    #[test]
    fn sanitize_replaces_invalid_chars() {
        assert_eq!(sanitize_tool_name("get pet.by/id"), "get_pet_by_id");
        assert_eq!(sanitize_tool_name("déjà vu"), "d_j__vu");
    }

    #[test]
    fn sanitize_truncates() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_tool_name(&long).len(), MAX_TOOL_NAME_LEN);
    }

    #[test]
    fn sanitize_empty_becomes_placeholder() {
        assert_eq!(sanitize_tool_name(""), "unnamed_id");
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["", "weird name!", "ok-name", &"x".repeat(200)] {
            let once = sanitize_tool_name(raw);
            assert_eq!(sanitize_tool_name(&once), once);
        }
    }

    #[test]
    fn parameters_schema_shape() {
        let def = ToolDefinition {
            name: "search".into(),
            description: "Search things".into(),
            parameters: vec![
                ToolParameter {
                    name: "query".into(),
                    kind: "string".into(),
                    description: "Search query".into(),
                    required: true,
                    schema: None,
                },
                ToolParameter {
                    name: "limit".into(),
                    kind: "integer".into(),
                    description: "Max results".into(),
                    required: false,
                    schema: None,
                },
            ],
        };
        let schema = def.parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["query"]["type"], "string");
        assert_eq!(schema["required"], serde_json::json!(["query"]));
    }

    #[test]
    fn parameters_schema_prefers_explicit_schema() {
        let def = ToolDefinition {
            name: "t".into(),
            description: String::new(),
            parameters: vec![ToolParameter {
                name: "filter".into(),
                kind: "object".into(),
                description: String::new(),
                required: false,
                schema: Some(serde_json::json!({ "type": "object", "properties": { "tag": { "type": "string" } } })),
            }],
        };
        let schema = def.parameters_schema();
        assert_eq!(
            schema["properties"]["filter"]["properties"]["tag"]["type"],
            "string"
        );
    }

    #[test]
    fn tool_result_markers() {
        let r = ToolResult::fail_marked("no such tool", "tool_not_found");
        assert!(!r.success);
        assert_eq!(
            r.metadata_value("error_name"),
            Some(&Value::String("tool_not_found".into()))
        );
    }

    #[test]
    fn tool_result_with_metadata_appends() {
        let r = ToolResult::ok(serde_json::json!({"answer": 42}))
            .with_metadata("sub_agent_run_id", Value::String("r1".into()));
        assert!(r.success);
        assert!(r.metadata_value("sub_agent_run_id").is_some());
    }
}
