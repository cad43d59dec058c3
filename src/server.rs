//! HTTP API server.
//!
//! Exposes source management, indexing triggers, and the chat assistant as
//! a JSON API for UI and admin layers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/sources` | List registered sources with status |
//! | `POST` | `/sources` | Register a repository |
//! | `GET`  | `/sources/{id}` | One source with status and stats |
//! | `DELETE` | `/sources/{id}` | Remove a source and its chunks (admin) |
//! | `POST` | `/sources/{id}/index` | Trigger an indexing run (admin) |
//! | `POST` | `/chat` | Ask the assistant |
//! | `GET`  | `/conversations` | List conversations |
//! | `POST` | `/conversations` | Create a conversation explicitly |
//! | `PATCH` | `/conversations/{id}` | Rename or pin |
//! | `DELETE` | `/conversations/{id}` | Delete with its turns |
//! | `GET`  | `/conversations/{id}/turns` | Full turn list |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Codes: `bad_request` (400), `forbidden` (403), `not_found` (404),
//! `conflict` (409), `generation_error` (502), `internal` (500).
//!
//! # Admin routes
//!
//! When `[server].admin_token` is set, index triggers and source removal
//! require `Authorization: Bearer <token>`. The check lives only at this
//! boundary; nothing inside the pipeline knows about roles.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatMode, ChatService};
use crate::config::Config;
use crate::db;
use crate::error::ChatError;
use crate::github::GithubClient;
use crate::history;
use crate::indexer;
use crate::llm::Generator;
use crate::migrate;
use crate::models::{Source, Turn};
use crate::progress::NoProgress;
use crate::store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    config: Arc<Config>,
    github: Arc<GithubClient>,
    chat: Arc<ChatService>,
}

/// Start the HTTP server on the configured bind address.
pub async fn run_server(config: &Config, generator: Arc<dyn Generator>) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let github = Arc::new(GithubClient::new(&config.github)?);
    let chat = Arc::new(ChatService::new(
        pool.clone(),
        config.clone(),
        generator,
    ));

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        github,
        chat,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/sources", get(handle_list_sources).post(handle_create_source))
        .route(
            "/sources/{id}",
            get(handle_get_source).delete(handle_delete_source),
        )
        .route("/sources/{id}/index", post(handle_trigger_index))
        .route("/chat", post(handle_chat))
        .route(
            "/conversations",
            get(handle_list_conversations).post(handle_create_conversation),
        )
        .route(
            "/conversations/{id}",
            patch(handle_patch_conversation).delete(handle_delete_conversation),
        )
        .route("/conversations/{id}/turns", get(handle_list_turns))
        .layer(cors)
        .with_state(state);

    let bind_addr = &config.server.bind;
    tracing::info!(addr = %bind_addr, "docpilot API listening");

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
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
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: "forbidden".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn classify_chat_error(err: ChatError) -> AppError {
    match &err {
        ChatError::ConversationNotFound(_) => not_found(err.to_string()),
        _ if err.is_client_error() => bad_request(err.to_string()),
        ChatError::Generation(_) => AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "generation_error".to_string(),
            message: err.to_string(),
        },
        _ => internal(err.to_string()),
    }
}

/// Boundary-level admin check. No roles exist inside the core.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = &state.config.server.admin_token else {
        return Ok(());
    };

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(forbidden("admin access required"))
    }
}

// ============ Boundary shapes ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceView {
    id: String,
    origin: OriginView,
    status: StatusView,
    stats: StatsView,
}

#[derive(Serialize)]
struct OriginView {
    owner: String,
    repo: String,
    branch: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
    state: String,
    progress: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_sync: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsView {
    file_count: i64,
    chunk_count: i64,
}

impl From<Source> for SourceView {
    fn from(s: Source) -> Self {
        Self {
            id: s.id,
            origin: OriginView {
                owner: s.owner,
                repo: s.repo,
                branch: s.branch,
            },
            status: StatusView {
                state: s.state.as_str().to_string(),
                progress: s.progress,
                error: s.error,
                last_sync: s.last_sync,
            },
            stats: StatsView {
                file_count: s.file_count,
                chunk_count: s.chunk_count,
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CitationView {
    repo_name: String,
    file_path: String,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatReplyView {
    message_id: String,
    conversation_id: String,
    response_text: String,
    citations: Vec<CitationView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationView {
    id: String,
    owner: String,
    title: String,
    pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    guide_id: Option<String>,
    message_count: i64,
    created_at: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TurnView {
    id: String,
    role: String,
    content: String,
    citations: Vec<CitationView>,
    is_error: bool,
    created_at: i64,
}

impl From<Turn> for TurnView {
    fn from(t: Turn) -> Self {
        Self {
            id: t.id,
            role: t.role.as_str().to_string(),
            content: t.content,
            citations: t
                .citations
                .into_iter()
                .map(|c| CitationView {
                    repo_name: c.repo_name,
                    file_path: c.file_path,
                    url: c.url,
                })
                .collect(),
            is_error: t.is_error,
            created_at: t.created_at,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Sources ============

async fn handle_list_sources(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceView>>, AppError> {
    let sources = store::list_sources(&state.pool)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(sources.into_iter().map(SourceView::from).collect()))
}

#[derive(Deserialize)]
struct CreateSourceRequest {
    owner: String,
    repo: String,
    branch: Option<String>,
}

async fn handle_create_source(
    State(state): State<AppState>,
    Json(req): Json<CreateSourceRequest>,
) -> Result<(StatusCode, Json<SourceView>), AppError> {
    let owner = req.owner.trim();
    let repo = req.repo.trim();
    if owner.is_empty() || repo.is_empty() {
        return Err(bad_request("owner and repo must not be empty"));
    }
    if owner.contains('/') || repo.contains('/') {
        return Err(bad_request("owner and repo must not contain '/'"));
    }
    let branch = req.branch.as_deref().unwrap_or("main").trim();
    if branch.is_empty() {
        return Err(bad_request("branch must not be empty"));
    }

    let source = store::create_source(&state.pool, owner, repo, branch)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok((StatusCode::CREATED, Json(SourceView::from(source))))
}

async fn handle_get_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SourceView>, AppError> {
    let source = store::get_source(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("no source with id {id}")))?;
    Ok(Json(SourceView::from(source)))
}

async fn handle_delete_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    require_admin(&state, &headers)?;

    let existing = store::get_source(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if existing.is_none() {
        return Err(not_found(format!("no source with id {id}")));
    }

    store::delete_source(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct TriggerResponse {
    state: String,
}

/// Acquire the lease synchronously so a live run can be reported as a
/// conflict, then drive the run in a background task.
async fn handle_trigger_index(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    require_admin(&state, &headers)?;

    let source = store::get_source(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("no source with id {id}")))?;

    let run_id = store::acquire_lease(&state.pool, &source.id, state.config.indexing.lease_secs)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| {
            conflict(format!(
                "indexing already in progress for {}",
                source.repo_name()
            ))
        })?;

    let pool = state.pool.clone();
    let config = state.config.clone();
    let github = state.github.clone();
    tokio::spawn(async move {
        let reporter = NoProgress;
        if let Err(err) =
            indexer::run_leased(&pool, &config, &github, &reporter, source, run_id).await
        {
            tracing::warn!(error = %err, "background indexing run failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            state: "indexing".to_string(),
        }),
    ))
}

// ============ Chat ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    conversation_id: Option<String>,
    owner: Option<String>,
    message: String,
    mode: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReplyView>, AppError> {
    let mode = ChatMode::parse(req.mode.as_deref().unwrap_or("text"));
    let owner = req.owner.as_deref().unwrap_or("local");

    let reply = state
        .chat
        .respond(req.conversation_id.as_deref(), owner, &req.message, mode)
        .await
        .map_err(classify_chat_error)?;

    Ok(Json(ChatReplyView {
        message_id: reply.message_id,
        conversation_id: reply.conversation_id,
        response_text: reply.response_text,
        citations: reply
            .citations
            .into_iter()
            .map(|c| CitationView {
                repo_name: c.repo_name,
                file_path: c.file_path,
                url: c.url,
            })
            .collect(),
    }))
}

// ============ Conversations ============

async fn handle_list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationView>>, AppError> {
    let conversations = history::list_conversations(&state.pool, None)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(
        conversations
            .into_iter()
            .map(|c| ConversationView {
                id: c.id,
                owner: c.owner,
                title: c.title,
                pinned: c.pinned,
                guide_id: c.guide_id,
                message_count: c.message_count,
                created_at: c.created_at,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationRequest {
    owner: Option<String>,
    title: Option<String>,
    guide_id: Option<String>,
}

async fn handle_create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationView>), AppError> {
    let owner = req.owner.as_deref().unwrap_or("local");
    let title = req.title.as_deref().unwrap_or("New conversation");

    let c = history::create_conversation(&state.pool, owner, title, req.guide_id.as_deref())
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(ConversationView {
            id: c.id,
            owner: c.owner,
            title: c.title,
            pinned: c.pinned,
            guide_id: c.guide_id,
            message_count: c.message_count,
            created_at: c.created_at,
        }),
    ))
}

#[derive(Deserialize)]
struct PatchConversationRequest {
    title: Option<String>,
    pinned: Option<bool>,
}

async fn handle_patch_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PatchConversationRequest>,
) -> Result<StatusCode, AppError> {
    let existing = history::get_conversation(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if existing.is_none() {
        return Err(not_found(format!("no conversation with id {id}")));
    }

    history::update_conversation(&state.pool, &id, req.title.as_deref(), req.pinned)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let existing = history::get_conversation(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if existing.is_none() {
        return Err(not_found(format!("no conversation with id {id}")));
    }

    history::delete_conversation(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_list_turns(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TurnView>>, AppError> {
    let existing = history::get_conversation(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    if existing.is_none() {
        return Err(not_found(format!("no conversation with id {id}")));
    }

    let turns = history::list_turns(&state.pool, &id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(turns.into_iter().map(TurnView::from).collect()))
}
