//! Web chat service.
//!
//! Serves the chat front end and the agent behind it, plus direct access to
//! the two docs tools over plain JSON and MCP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/configure` | Models and built-in tools offered to the UI |
//! | `POST` | `/api/chat` | Run the agent; replies with a UI message stream (SSE) |
//! | `GET`  | `/tools/list` | List tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `*`    | `/mcp` | MCP Streamable HTTP endpoint |
//! | `GET`  | anything else | Static front end from `server.dist_dir` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "no user message" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `tool_error` (500),
//! `agent_disabled` (503), `internal` (500). Failures after the chat stream
//! has started are reported in-stream as an `error` chunk instead.

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tower_http::cors::{Any, CorsLayer};

use crate::agent::{self, Agent, AgentEvent, ChatModel};
use crate::config::Config;
use crate::ingest;
use crate::mcp::McpBridge;
use crate::search::SearchIndex;
use crate::toc;
use crate::tools::{validate_params, ToolContext, ToolRegistry};
use crate::ui_stream::{self, ChatRequest, UiStream};

/// Shared state behind every handler.
pub struct AppState {
    config: Arc<Config>,
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    /// Default chat model; `None` when the agent is disabled or unavailable.
    model: Option<Arc<dyn ChatModel>>,
    /// Agent instructions, ToC included; built once at startup.
    system: String,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        index: Arc<dyn SearchIndex>,
        model: Option<Arc<dyn ChatModel>>,
        toc: &str,
    ) -> Self {
        let system = agent::instructions(&config, toc);
        Self {
            ctx: ToolContext::new(config.clone(), index),
            tools: Arc::new(ToolRegistry::with_builtins()),
            config,
            model,
            system,
        }
    }
}

/// Build the router for `state`.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mcp = McpBridge::new(state.tools.clone(), state.ctx.clone()).into_service();

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/configure", get(handle_configure))
        .route("/api/chat", post(handle_chat))
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .nest_service("/mcp", mcp)
        .fallback(handle_static)
        .layer(cors)
        .with_state(state)
}

/// Start the web service on `[server].bind`.
///
/// Opens the index (building it when empty) and the configured chat model
/// first. A model that cannot be created (e.g. missing API key) leaves the
/// service running with chat disabled.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());
    let store = ingest::open_populated_index(&config).await?;
    let toc = toc::build_toc(&config)?;

    let model = if config.agent.is_enabled() {
        match agent::create_model(&config.agent) {
            Ok(model) => Some(model),
            Err(e) => {
                tracing::warn!(error = %e, "chat model unavailable; /api/chat is disabled");
                None
            }
        }
    } else {
        None
    };

    let state = Arc::new(AppState::new(config.clone(), Arc::new(store), model, &toc));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "docs-chat listening");
    println!("docs-chat listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error",
        message: message.into(),
    }
}

fn agent_disabled(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "agent_disabled",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /api/configure ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigureResponse {
    models: Vec<ModelInfo>,
    builtin_tools: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    id: String,
    name: String,
    builtin_tools: Vec<String>,
}

/// The configured model list; just the default model when none is listed.
async fn handle_configure(State(state): State<Arc<AppState>>) -> Json<ConfigureResponse> {
    let agent = &state.config.agent;
    let models = if !agent.is_enabled() {
        Vec::new()
    } else if agent.models.is_empty() {
        vec![ModelInfo {
            id: format!("{}:{}", agent.provider, agent.model),
            name: agent.model.clone(),
            builtin_tools: Vec::new(),
        }]
    } else {
        agent
            .models
            .iter()
            .map(|m| ModelInfo {
                id: m.id.clone(),
                name: m.name.clone(),
                builtin_tools: Vec::new(),
            })
            .collect()
    };

    Json(ConfigureResponse {
        models,
        builtin_tools: Vec::new(),
    })
}

// ============ POST /api/chat ============

/// Run the agent on the posted conversation and stream the reply.
///
/// The agent runs in its own task; dropping the response stops delivery
/// but lets the in-flight turn finish.
async fn handle_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let history = ui_stream::history_from_ui_messages(&request.messages);
    if history.is_empty() {
        return Err(bad_request("no user message"));
    }

    let model = match request
        .model
        .as_deref()
        .and_then(|id| state.config.agent.with_model_id(id))
    {
        Some(cfg) => {
            agent::create_model(&cfg).map_err(|e| agent_disabled(format!("{e:#}")))?
        }
        None => state
            .model
            .clone()
            .ok_or_else(|| agent_disabled("no chat model is configured"))?,
    };
    tracing::info!(model = %model.name(), messages = history.len(), "chat request");

    let agent = Agent::new(
        model,
        state.tools.clone(),
        state.ctx.clone(),
        state.system.clone(),
    );

    let (tx, rx) = mpsc::channel::<Event>(64);
    tokio::spawn(async move {
        let ui = UiStream::new();
        for chunk in ui.start() {
            send_chunk(&tx, chunk).await;
        }

        let (agent_tx, mut agent_rx) = mpsc::channel::<AgentEvent>(32);
        let run = tokio::spawn(async move { agent.run(history, Some(&agent_tx)).await });

        while let Some(event) = agent_rx.recv().await {
            for chunk in ui.event(&event) {
                send_chunk(&tx, chunk).await;
            }
        }

        match run.await {
            Ok(Ok(_)) => {
                for chunk in ui.finish() {
                    send_chunk(&tx, chunk).await;
                }
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "agent run failed");
                send_chunk(&tx, ui.error(&format!("{e:#}"))).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "agent task panicked");
                send_chunk(&tx, ui.error("internal error")).await;
            }
        }
        let _ = tx.send(Event::default().data(ui_stream::DONE)).await;
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok((
        [(ui_stream::STREAM_HEADER, ui_stream::STREAM_VERSION)],
        Sse::new(stream).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

async fn send_chunk(tx: &mpsc::Sender<Event>, chunk: Value) {
    // The client may have gone away; the run still completes.
    let _ = tx.send(Event::default().data(chunk.to_string())).await;
}

// ============ /tools ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<Arc<AppState>>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

async fn handle_tool_call(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let result = tool
        .execute(params, &state.ctx)
        .await
        .map_err(|e| tool_error(format!("{}: {:#}", name, e)))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

// ============ Static front end ============

/// Serve a file from `dist_dir`, or `index.html` for client-side routes.
async fn handle_static(State(state): State<Arc<AppState>>, uri: Uri) -> Result<Response, AppError> {
    let Some(dist) = state.config.server.dist_dir.as_ref() else {
        return Err(not_found("no front end configured"));
    };

    if let Some(path) = asset_path(dist, uri.path()) {
        if path.is_file() {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| internal(format!("{}: {}", path.display(), e)))?;
            return Ok(([(header::CONTENT_TYPE, content_type(&path))], bytes).into_response());
        }
    }

    let index_path = dist.join("index.html");
    let html = tokio::fs::read_to_string(&index_path)
        .await
        .map_err(|_| not_found(format!("{} not found", index_path.display())))?;
    Ok((
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        inject_base(&html, "/"),
    )
        .into_response())
}

/// Map a request path onto `dist`, refusing anything that is not a plain
/// relative path.
fn asset_path(dist: &std::path::Path, request_path: &str) -> Option<PathBuf> {
    let relative = std::path::Path::new(request_path.trim_start_matches('/'));
    if relative.as_os_str().is_empty()
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(dist.join(relative))
}

const CHARSET_META: &str = "<meta charset=\"UTF-8\" />";

/// Insert `<base href>` right after the charset meta tag, if present.
pub fn inject_base(html: &str, href: &str) -> String {
    match html.find(CHARSET_META) {
        Some(pos) => {
            let end = pos + CHARSET_META.len();
            format!("{}<base href=\"{}\" />{}", &html[..end], href, &html[end..])
        }
        None => html.to_string(),
    }
}

fn content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "woff" => "font/woff",
        "txt" | "md" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
