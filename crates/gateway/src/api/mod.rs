//! API endpoints — threads, streaming and non-streaming messages, run
//! management, and toolset inventory.
//!
//! Event transport: Server-Sent Events with one JSON object per `data:`
//! frame; each run's stream ends with exactly one terminal event or
//! pauses at `run.requires_action`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use sw_agents::{Agent, AgentContext, AggregatedToolProvider, ToolOutput, ToolSetProvider};
use sw_domain::auth::{ApiKeyLocation, AuthOverride};
use sw_domain::error::Error;
use sw_domain::event::{AgentEvent, EventData};
use sw_domain::message::{Message, Thread};
use sw_domain::run::{RunConfig, RunStatus, ToolChoice};
use sw_domain::tool::ToolProvider;
use sw_stores::SortOrder;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/threads", post(create_thread))
        .route("/v1/threads/:thread_id/messages", get(list_messages))
        .route("/v1/threads/:thread_id/messages", post(send_message))
        .route(
            "/v1/threads/:thread_id/messages/stream",
            post(stream_message),
        )
        .route("/v1/runs", get(list_runs))
        .route("/v1/runs/:run_id", get(get_run))
        .route("/v1/runs/:run_id/cancel", post(cancel_run))
        .route(
            "/v1/runs/:run_id/submit_tool_outputs",
            post(submit_tool_outputs),
        )
        .route("/v1/toolsets", get(list_toolsets))
        .with_state(state)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum AgentKind {
    #[default]
    Base,
    Planner,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunOverrides {
    model: Option<String>,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_tool_call_continuations: Option<u32>,
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    message: String,
    #[serde(default)]
    agent: AgentKind,
    #[serde(default)]
    config: Option<RunOverrides>,
}

#[derive(Debug, Deserialize)]
struct CreateThreadRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolOutputWire {
    tool_call_id: String,
    output: String,
    #[serde(default)]
    tool_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputsRequest {
    tool_outputs: Vec<ToolOutputWire>,
    #[serde(default)]
    agent: AgentKind,
}

#[derive(Debug, Deserialize)]
struct ListRunsQuery {
    #[serde(default)]
    status: Option<RunStatus>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Per-provider auth overrides from the `X-Provider-Auth` header:
/// a JSON object keyed by source id.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireAuth {
    None,
    Bearer {
        token: String,
    },
    ApiKey {
        name: String,
        location: ApiKeyLocation,
        key: String,
    },
}

impl From<WireAuth> for AuthOverride {
    fn from(wire: WireAuth) -> Self {
        match wire {
            WireAuth::None => AuthOverride::None,
            WireAuth::Bearer { token } => AuthOverride::bearer(token),
            WireAuth::ApiKey {
                name,
                location,
                key,
            } => AuthOverride::api_key(name, location, key),
        }
    }
}

fn parse_auth_overrides(headers: &HeaderMap) -> Result<HashMap<String, AuthOverride>, String> {
    let Some(raw) = headers.get("x-provider-auth") else {
        return Ok(HashMap::new());
    };
    let raw = raw
        .to_str()
        .map_err(|_| "x-provider-auth is not valid UTF-8".to_string())?;
    let wire: HashMap<String, WireAuth> =
        serde_json::from_str(raw).map_err(|e| format!("x-provider-auth is not valid: {e}"))?;
    Ok(wire.into_iter().map(|(k, v)| (k, v.into())).collect())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl AppState {
    fn agent_for(&self, kind: AgentKind) -> Arc<dyn Agent> {
        match kind {
            AgentKind::Base => self.base_agent.clone(),
            AgentKind::Planner => self.planner.clone(),
        }
    }

    /// The union of every registered toolset (the base agent's
    /// environment). The planner swaps this for the delegation tool.
    fn aggregated_provider(&self) -> Arc<dyn ToolProvider> {
        let providers: Vec<Arc<dyn ToolProvider>> = self
            .orchestrator
            .list()
            .into_iter()
            .map(|set| Arc::new(ToolSetProvider::new(set)) as Arc<dyn ToolProvider>)
            .collect();
        Arc::new(AggregatedToolProvider::new(providers))
    }

    fn agent_context(
        &self,
        overrides: Option<&RunOverrides>,
        auth: HashMap<String, AuthOverride>,
    ) -> Result<AgentContext, Error> {
        let mut config: RunConfig = self.config.run_config(&auth)?;
        if let Some(o) = overrides {
            if let Some(model) = &o.model {
                config.model = model.clone();
            }
            if let Some(prompt) = &o.system_prompt {
                config.system_prompt = Some(prompt.clone());
            }
            if let Some(t) = o.temperature {
                config.temperature = Some(t);
            }
            if let Some(m) = o.max_tokens {
                config.max_tokens = Some(m);
            }
            if let Some(n) = o.max_tool_call_continuations {
                config.max_tool_call_continuations = n;
            }
            if let Some(choice) = &o.tool_choice {
                config.tool_choice = choice.clone();
            }
            config.validate()?;
        }

        Ok(AgentContext {
            llm: self.llm.clone(),
            tool_provider: self.aggregated_provider(),
            messages: self.messages.clone(),
            threads: self.threads.clone(),
            runs: self.runs.clone(),
            config: Arc::new(config),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn create_thread(
    State(state): State<AppState>,
    Json(body): Json<CreateThreadRequest>,
) -> Response {
    let mut thread = Thread::new();
    thread.title = body.title;
    thread.user_id = body.user_id;
    match state.threads.create_thread(thread).await {
        Ok(thread) => Json(thread).into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
) -> Response {
    match state
        .messages
        .get_messages(thread_id, None, SortOrder::Ascending)
        .await
    {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /v1/threads/:id/messages/stream — SSE of agent events.
async fn stream_message(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<MessageRequest>,
) -> Response {
    match start_run(&state, thread_id, &headers, body).await {
        Ok(events) => sse_response(events),
        Err(response) => response,
    }
}

/// POST /v1/threads/:id/messages — non-streaming aggregate of the same
/// event stream.
async fn send_message(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<MessageRequest>,
) -> Response {
    let mut events = match start_run(&state, thread_id, &headers, body).await {
        Ok(events) => events,
        Err(response) => return response,
    };

    let mut run_id = None;
    let mut content = String::new();
    let mut status = json!("in_progress");
    let mut error = None;
    let mut required_action = None;
    let mut tool_results = Vec::new();

    while let Some(event) = events.recv().await {
        run_id.get_or_insert(event.run_id);
        match event.data {
            EventData::RunCompleted { final_messages } => {
                if let Some(last) = final_messages.last() {
                    content = last.content.clone();
                }
                status = json!("completed");
            }
            EventData::RunFailed { error: e } => {
                status = json!("failed");
                error = Some(json!({ "code": e.code, "message": e.message }));
            }
            EventData::RunStatusChanged {
                current_status: RunStatus::Cancelled,
                ..
            } => status = json!("cancelled"),
            EventData::RunRequiresAction { required_action: ra } => {
                status = json!("requires_action");
                required_action = Some(json!({ "tool_calls": ra.tool_calls }));
            }
            EventData::ToolExecutionCompleted {
                tool_call_id,
                tool_name,
                result,
                ..
            } => tool_results.push(json!({
                "tool_call_id": tool_call_id,
                "tool_name": tool_name,
                "result": result,
            })),
            _ => {}
        }
    }

    Json(json!({
        "run_id": run_id,
        "thread_id": thread_id,
        "status": status,
        "content": content,
        "tool_results": tool_results,
        "required_action": required_action,
        "error": error,
    }))
    .into_response()
}

async fn start_run(
    state: &AppState,
    thread_id: Uuid,
    headers: &HeaderMap,
    body: MessageRequest,
) -> Result<mpsc::Receiver<AgentEvent>, Response> {
    if body.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    match state.threads.get_thread(thread_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("thread {thread_id} not found") })),
            )
                .into_response());
        }
        Err(e) => return Err(error_response(e)),
    }

    let auth = match parse_auth_overrides(headers) {
        Ok(auth) => auth,
        Err(message) => return Err(bad_request(&message)),
    };

    let ctx = match state.agent_context(body.config.as_ref(), auth) {
        Ok(ctx) => ctx,
        Err(e) => return Err(error_response(e)),
    };

    let agent = state.agent_for(body.agent);
    let user_message = Message::user(thread_id, body.message);
    match agent.run(ctx, thread_id, vec![user_message]).await {
        Ok(handle) => Ok(handle.events),
        Err(e) => Err(error_response(e)),
    }
}

async fn submit_tool_outputs(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<SubmitToolOutputsRequest>,
) -> Response {
    let auth = match parse_auth_overrides(&headers) {
        Ok(auth) => auth,
        Err(message) => return bad_request(&message),
    };
    let ctx = match state.agent_context(None, auth) {
        Ok(ctx) => ctx,
        Err(e) => return error_response(e),
    };

    let outputs: Vec<ToolOutput> = body
        .tool_outputs
        .into_iter()
        .map(|o| ToolOutput {
            tool_call_id: o.tool_call_id,
            output: o.output,
            tool_name: o.tool_name,
        })
        .collect();

    let agent = state.agent_for(body.agent);
    match agent.submit_tool_outputs(ctx, run_id, outputs).await {
        Ok(handle) => sse_response(handle.events),
        Err(e) => error_response(e),
    }
}

async fn cancel_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    // Both agents share one interruption hub.
    let cancelled = state.base_agent.cancel(run_id);
    Json(json!({ "run_id": run_id, "cancelled": cancelled })).into_response()
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Response {
    match state
        .runs
        .list_runs(query.status, query.limit, query.offset)
        .await
    {
        Ok((runs, total)) => Json(json!({ "runs": runs, "total": total })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    match state.runs.get_run(run_id).await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("run {run_id} not found") })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_toolsets(State(state): State<AppState>) -> Response {
    let sets: Vec<_> = state
        .orchestrator
        .list()
        .into_iter()
        .map(|set| {
            json!({
                "id": set.id,
                "name": set.name,
                "description": set.description,
                "tools": set.tool_names(),
                "metadata": set.metadata,
            })
        })
        .collect();
    Json(json!({ "toolsets": sets })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn event_stream(
    mut rx: mpsc::Receiver<AgentEvent>,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(event.kind()).data(data));
        }
    }
}

fn sse_response(rx: mpsc::Receiver<AgentEvent>) -> Response {
    let mut response = Sse::new(event_stream(rx))
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(
        "Cache-Control",
        axum::http::HeaderValue::from_static("no-cache"),
    );
    // Disable proxy buffering so frames flush immediately.
    headers.insert(
        "X-Accel-Buffering",
        axum::http::HeaderValue::from_static("no"),
    );
    response
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::Configuration(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::ToolNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "error": err.to_string(), "code": err.code() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_auth_parses_all_variants() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-provider-auth",
            r#"{
                "petstore": { "type": "bearer", "token": "tok_1" },
                "weather": { "type": "api_key", "name": "X-Key",
                             "location": "header", "key": "k" },
                "internal": { "type": "none" }
            }"#
            .replace('\n', " ")
            .parse()
            .unwrap(),
        );

        let overrides = parse_auth_overrides(&headers).unwrap();
        assert_eq!(overrides.len(), 3);
        assert!(matches!(
            overrides["petstore"],
            AuthOverride::Bearer { .. }
        ));
        assert!(matches!(overrides["weather"], AuthOverride::ApiKey { .. }));
        assert!(matches!(overrides["internal"], AuthOverride::None));
    }

    #[test]
    fn missing_auth_header_is_empty() {
        let overrides = parse_auth_overrides(&HeaderMap::new()).unwrap();
        assert!(overrides.is_empty());
    }

    #[test]
    fn malformed_auth_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-provider-auth", "{not json".parse().unwrap());
        assert!(parse_auth_overrides(&headers).is_err());
    }

    #[test]
    fn run_overrides_deserialize_with_tool_choice() {
        let overrides: RunOverrides = serde_json::from_value(json!({
            "model": "other-model",
            "tool_choice": { "force": "lookup" }
        }))
        .unwrap();
        assert_eq!(overrides.model.as_deref(), Some("other-model"));
        assert_eq!(
            overrides.tool_choice,
            Some(ToolChoice::Force("lookup".into()))
        );
    }
}
