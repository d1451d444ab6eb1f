//! Operation→tool projection and REST invocation.
//!
//! Each OpenAPI operation becomes one tool named after its sanitized
//! `operationId`. Parameters map onto the tool's parameter list (path,
//! query, and header parameters by name; the request body as a `body`
//! object). Documents with no operations fall back to a single
//! `genericHttpRequest` escape hatch.
//!
//! Authentication: the source's static auth applies by default; a
//! per-request override in `run_config.request_auth_overrides` (keyed by
//! source id) replaces it for that call only and never mutates the
//! provider.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};

use sw_domain::auth::AuthOverride;
use sw_domain::error::Error;
use sw_domain::tool::{
    sanitize_tool_name, Tool, ToolContext, ToolDefinition, ToolParameter, ToolProvider, ToolResult,
};
use sw_domain::Result;

use crate::document::{OpenApiDocument, Operation, ParameterDef};

pub const GENERIC_HTTP_TOOL_NAME: &str = "genericHttpRequest";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Initialized {
    title: String,
    base_url: Option<String>,
    tags: Vec<String>,
    /// tag → tool names carrying it.
    tag_index: HashMap<String, Vec<String>>,
    tools: Vec<Arc<dyn Tool>>,
    auxiliary: Vec<String>,
}

pub struct OpenApiToolProvider {
    source_id: String,
    spec_text: String,
    base_url_override: Option<String>,
    static_auth: Option<AuthOverride>,
    http: reqwest::Client,
    state: RwLock<Option<Arc<Initialized>>>,
}

impl OpenApiToolProvider {
    pub fn from_spec_text(source_id: impl Into<String>, spec_text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            spec_text: spec_text.into(),
            base_url_override: None,
            static_auth: None,
            http: reqwest::Client::new(),
            state: RwLock::new(None),
        }
    }

    /// Override the server URL from the document.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url_override = Some(base_url.into());
        self
    }

    /// Default authentication for every call from this source.
    pub fn with_static_auth(mut self, auth: AuthOverride) -> Self {
        self.static_auth = Some(auth);
        self
    }

    fn initialized(&self) -> Option<Arc<Initialized>> {
        self.state.read().clone()
    }

    fn build(&self) -> Result<Initialized> {
        let doc = OpenApiDocument::parse(&self.spec_text)?;
        let base_url = self
            .base_url_override
            .clone()
            .or_else(|| doc.base_url().map(str::to_string));

        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        let mut tag_index: HashMap<String, Vec<String>> = HashMap::new();

        for (path, item) in &doc.paths {
            for (method, op) in item.operations() {
                let tool = OperationTool::project(
                    &self.source_id,
                    method,
                    path,
                    op,
                    &item.parameters,
                    base_url.clone(),
                    self.http.clone(),
                    self.static_auth.clone(),
                );
                let name = tool.definition.name.clone();
                for tag in &op.tags {
                    tag_index.entry(tag.clone()).or_default().push(name.clone());
                }
                tools.push(Arc::new(tool));
            }
        }

        let mut auxiliary = Vec::new();
        if tools.is_empty() {
            tracing::warn!(
                source_id = %self.source_id,
                "OpenAPI document has no operations, exposing {GENERIC_HTTP_TOOL_NAME} only"
            );
            tools.push(Arc::new(GenericHttpTool {
                source_id: self.source_id.clone(),
                base_url: base_url.clone(),
                http: self.http.clone(),
                static_auth: self.static_auth.clone(),
            }));
            auxiliary.push(GENERIC_HTTP_TOOL_NAME.to_string());
        }

        Ok(Initialized {
            title: doc.info.title.clone(),
            base_url,
            tags: doc.tag_names(),
            tag_index,
            tools,
            auxiliary,
        })
    }
}

#[async_trait::async_trait]
impl ToolProvider for OpenApiToolProvider {
    async fn ensure_initialized(&self) -> Result<()> {
        if self.state.read().is_some() {
            return Ok(());
        }
        let built = self.build()?;
        tracing::info!(
            source_id = %self.source_id,
            api = %built.title,
            tools = built.tools.len(),
            tags = built.tags.len(),
            "OpenAPI source initialized"
        );
        *self.state.write() = Some(Arc::new(built));
        Ok(())
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.initialized()
            .map(|s| s.tools.clone())
            .unwrap_or_default()
    }

    fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.initialized()?
            .tools
            .iter()
            .find(|t| t.definition().name == name)
            .cloned()
    }

    fn tags(&self) -> Vec<String> {
        self.initialized()
            .map(|s| s.tags.clone())
            .unwrap_or_default()
    }

    fn tools_with_tag(&self, tag: &str) -> Vec<Arc<dyn Tool>> {
        let Some(state) = self.initialized() else {
            return Vec::new();
        };
        let Some(names) = state.tag_index.get(tag) else {
            return Vec::new();
        };
        state
            .tools
            .iter()
            .filter(|t| names.contains(&t.definition().name))
            .cloned()
            .collect()
    }

    fn auxiliary_tool_names(&self) -> Vec<String> {
        self.initialized()
            .map(|s| s.auxiliary.clone())
            .unwrap_or_default()
    }

    fn title(&self) -> Option<String> {
        self.initialized().map(|s| s.title.clone())
    }

    fn base_url(&self) -> Option<String> {
        self.initialized().and_then(|s| s.base_url.clone())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Operation tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct OperationTool {
    source_id: String,
    method: String,
    path: String,
    base_url: Option<String>,
    parameters: Vec<ParameterDef>,
    has_body: bool,
    definition: ToolDefinition,
    http: reqwest::Client,
    static_auth: Option<AuthOverride>,
}

impl OperationTool {
    #[allow(clippy::too_many_arguments)]
    fn project(
        source_id: &str,
        method: &str,
        path: &str,
        op: &Operation,
        shared_params: &[ParameterDef],
        base_url: Option<String>,
        http: reqwest::Client,
        static_auth: Option<AuthOverride>,
    ) -> Self {
        let mut parameters: Vec<ParameterDef> = shared_params.to_vec();
        parameters.extend(op.parameters.iter().cloned());

        let raw_name = op
            .operation_id
            .clone()
            .unwrap_or_else(|| format!("{}_{}", method.to_lowercase(), path));
        let name = sanitize_tool_name(&raw_name);

        let mut description = op.summary.clone().unwrap_or_default();
        if let Some(extra) = &op.description {
            if description.is_empty() {
                description = extra.clone();
            } else {
                description = format!("{description}. {extra}");
            }
        }
        if description.is_empty() {
            description = format!("{method} {path}");
        }

        let mut def_params: Vec<ToolParameter> = parameters
            .iter()
            .map(|p| ToolParameter {
                name: p.name.clone(),
                kind: p
                    .schema
                    .as_ref()
                    .and_then(|s| s.get("type"))
                    .and_then(|t| t.as_str())
                    .unwrap_or("string")
                    .to_string(),
                description: p.description.clone().unwrap_or_default(),
                required: p.required,
                schema: p.schema.clone(),
            })
            .collect();

        let has_body = op.request_body.is_some();
        if let Some(body) = &op.request_body {
            def_params.push(ToolParameter {
                name: "body".into(),
                kind: "object".into(),
                description: body
                    .description
                    .clone()
                    .unwrap_or_else(|| "JSON request body".into()),
                required: body.required,
                schema: body.json_schema().cloned(),
            });
        }

        Self {
            source_id: source_id.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            base_url,
            parameters,
            has_body,
            definition: ToolDefinition {
                name,
                description,
                parameters: def_params,
            },
            http,
            static_auth,
        }
    }

    async fn build_request(&self, input: &Value, ctx: &ToolContext) -> Result<reqwest::Request> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            Error::Configuration(format!(
                "source '{}' has no base URL for {}",
                self.source_id, self.definition.name
            ))
        })?;

        let mut path = self.path.clone();
        for param in self.parameters.iter().filter(|p| p.location == "path") {
            let Some(value) = input.get(&param.name) else {
                return Err(Error::Validation(format!(
                    "missing required path parameter '{}'",
                    param.name
                )));
            };
            path = path.replace(&format!("{{{}}}", param.name), &value_text(value));
        }

        let url = format!("{}{}", base.trim_end_matches('/'), path);
        let method = reqwest::Method::from_bytes(self.method.as_bytes())
            .map_err(|_| Error::Validation(format!("bad HTTP method '{}'", self.method)))?;
        let mut builder = self.http.request(method, url);

        for param in &self.parameters {
            let Some(value) = input.get(&param.name) else {
                if param.required && param.location != "path" {
                    return Err(Error::Validation(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
                continue;
            };
            match param.location.as_str() {
                "query" => builder = builder.query(&[(&param.name, value_text(value))]),
                "header" => builder = builder.header(&param.name, value_text(value)),
                _ => {}
            }
        }

        if self.has_body {
            if let Some(body) = input.get("body") {
                builder = builder.json(body);
            }
        }

        builder = apply_auth(
            builder,
            &self.source_id,
            self.static_auth.as_ref(),
            ctx,
        )
        .await?;
        builder
            .build()
            .map_err(|e| Error::Validation(format!("could not build request: {e}")))
    }
}

#[async_trait::async_trait]
impl Tool for OperationTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let request = match self.build_request(&input, ctx).await {
            Ok(request) => request,
            Err(e) => return ToolResult::fail(e.to_string()),
        };
        dispatch(&self.http, request).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generic HTTP escape hatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct GenericHttpTool {
    source_id: String,
    base_url: Option<String>,
    http: reqwest::Client,
    static_auth: Option<AuthOverride>,
}

#[async_trait::async_trait]
impl Tool for GenericHttpTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: GENERIC_HTTP_TOOL_NAME.into(),
            description: "Make an HTTP request against the API's base URL \
                          when no structured operation fits."
                .into(),
            parameters: vec![
                ToolParameter {
                    name: "method".into(),
                    kind: "string".into(),
                    description: "HTTP method (GET, POST, ...)".into(),
                    required: true,
                    schema: None,
                },
                ToolParameter {
                    name: "path".into(),
                    kind: "string".into(),
                    description: "Request path, starting with '/'".into(),
                    required: true,
                    schema: None,
                },
                ToolParameter {
                    name: "query".into(),
                    kind: "object".into(),
                    description: "Query parameters".into(),
                    required: false,
                    schema: None,
                },
                ToolParameter {
                    name: "body".into(),
                    kind: "object".into(),
                    description: "JSON request body".into(),
                    required: false,
                    schema: None,
                },
            ],
        }
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(base) = self.base_url.as_deref() else {
            return ToolResult::fail(format!(
                "source '{}' has no base URL configured",
                self.source_id
            ));
        };
        let method = input.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let path = input.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let Ok(method) = reqwest::Method::from_bytes(method.as_bytes()) else {
            return ToolResult::fail(format!("bad HTTP method '{method}'"));
        };
        if !path.starts_with('/') {
            return ToolResult::fail("path must start with '/'");
        }

        let mut builder = self
            .http
            .request(method, format!("{}{}", base.trim_end_matches('/'), path));
        if let Some(query) = input.get("query").and_then(|v| v.as_object()) {
            for (key, value) in query {
                builder = builder.query(&[(key, value_text(value))]);
            }
        }
        if let Some(body) = input.get("body") {
            builder = builder.json(body);
        }
        builder = match apply_auth(builder, &self.source_id, self.static_auth.as_ref(), ctx).await
        {
            Ok(builder) => builder,
            Err(e) => return ToolResult::fail(e.to_string()),
        };

        let request = match builder.build() {
            Ok(request) => request,
            Err(e) => return ToolResult::fail(format!("could not build request: {e}")),
        };
        dispatch(&self.http, request).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared invocation plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Apply authentication: the run's per-source override wins over the
/// source's static auth; `AuthOverride::None` strips auth entirely.
async fn apply_auth(
    mut builder: reqwest::RequestBuilder,
    source_id: &str,
    static_auth: Option<&AuthOverride>,
    ctx: &ToolContext,
) -> Result<reqwest::RequestBuilder> {
    let auth = ctx
        .config
        .request_auth_overrides
        .get(source_id)
        .or(static_auth);
    let Some(auth) = auth else {
        return Ok(builder);
    };

    match auth {
        AuthOverride::None => {}
        AuthOverride::Bearer { source } => {
            let token = source.resolve(ctx).await?;
            builder = builder.bearer_auth(token);
        }
        AuthOverride::ApiKey {
            name,
            location,
            key,
        } => match location {
            sw_domain::auth::ApiKeyLocation::Header => {
                builder = builder.header(name, key);
            }
            sw_domain::auth::ApiKeyLocation::Query => {
                builder = builder.query(&[(name, key)]);
            }
        },
    }
    Ok(builder)
}

async fn dispatch(http: &reqwest::Client, request: reqwest::Request) -> ToolResult {
    let method = request.method().clone();
    let url = request.url().clone();

    let response = match http.execute(request).await {
        Ok(response) => response,
        Err(e) => {
            return ToolResult::fail(format!("{method} {url} failed: {e}"))
                .with_metadata("error_name", json!("network"));
        }
    };

    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

    if status.is_success() {
        ToolResult::ok(json!({ "status": status.as_u16(), "body": body }))
    } else {
        tracing::warn!(%method, %url, status = status.as_u16(), "REST call failed");
        ToolResult::fail(format!("{method} {url} returned {status}"))
            .with_metadata("http_status", json!(status.as_u16()))
            .with_metadata("body", body)
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
