//! HTTP/WebSocket Handlers

use axum::{
    Extension, Json,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use agent_core::{Message, SessionId, StoredMessage, ToolCallRecord, TurnEvent, TurnOutcome};
use agent_core::session::SessionSummary;
use plant_advisor::knowledge::DocumentInfo;

use crate::error::{ApiError, ErrorResponse};
use crate::middleware::AuthUser;
use crate::state::AppState;

/// Longest accepted chat message, in characters
pub const MAX_MESSAGE_CHARS: usize = 20_000;

const MAX_SESSION_ID_LEN: usize = 128;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: String,
    pub provider_connected: bool,
    pub embedding_model: String,
    pub documents: usize,
    pub chunks: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub reply: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub truncated: bool,
    pub warnings: Vec<String>,
    pub history_saved: bool,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub session_id: String,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub session_id: String,
    pub cleared: bool,
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(default = "default_sessions_limit")]
    pub limit: usize,
}

const fn default_sessions_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub file_name: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentsResponse {
    pub documents: Vec<DocumentInfo>,
    pub chunk_count: usize,
}

/// Server-to-client WebSocket frame
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Fragment of the final answer
    Chunk { content: String },
    /// Drop the chunks received since the last tool frame
    Reset,
    /// A tool started or finished
    Tool {
        status: &'static str,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        record: Option<ToolCallRecord>,
    },
    /// Turn complete; same body as the chat endpoint
    Done(ChatResponse),
    Error(ErrorResponse),
}

// ============================================================================
// Validation
// ============================================================================

/// Message rules: 1 to 20000 characters, no NUL bytes, no script tags
pub fn validate_message(message: &str) -> Result<(), ApiError> {
    let chars = message.chars().count();
    if message.trim().is_empty() {
        return Err(ApiError::Validation("Message must not be empty".into()));
    }
    if chars > MAX_MESSAGE_CHARS {
        return Err(ApiError::Validation(format!(
            "Message is {chars} characters; the limit is {MAX_MESSAGE_CHARS}"
        )));
    }
    if message.contains('\0') {
        return Err(ApiError::Validation("Message contains null bytes".into()));
    }

    let lower = message.to_lowercase();
    if lower
        .find("<script")
        .is_some_and(|start| lower[start..].contains("</script>"))
    {
        return Err(ApiError::Validation("Message contains script tags".into()));
    }
    Ok(())
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    let valid = !raw.is_empty()
        && raw.len() <= MAX_SESSION_ID_LEN
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(SessionId::from_string(raw))
    } else {
        Err(ApiError::Validation(
            "session_id must be 1-128 characters of letters, digits, '-' or '_'".into(),
        ))
    }
}

// ============================================================================
// Chat turn
// ============================================================================

/// A validated turn ready to hand to the agent
struct PreparedTurn {
    session_id: SessionId,
    history: Vec<Message>,
    warnings: Vec<String>,
}

async fn prepare_turn(state: &AppState, user: &AuthUser, request: &ChatRequest) -> Result<PreparedTurn, ApiError> {
    validate_message(&request.message)?;
    let session_id = request
        .session_id
        .as_deref()
        .map_or_else(|| Ok(SessionId::new()), parse_session_id)?;

    let mut warnings = Vec::new();
    let history = match state.sessions.history(&session_id).await {
        Ok(Some(session)) if !session.is_owned_by(&user.user_id) => {
            return Err(agent_core::AgentError::SessionOwnership(session_id.to_string()).into());
        }
        Ok(Some(session)) => session.history(),
        Ok(None) => Vec::new(),
        Err(e) => {
            tracing::error!(error = %e, session_id = %session_id, "Could not load chat history");
            warnings.push("Earlier messages could not be loaded; answering without them.".into());
            Vec::new()
        }
    };

    Ok(PreparedTurn {
        session_id,
        history,
        warnings,
    })
}

/// Persist the exchange; a storage failure is reported, not raised
async fn finish_turn(state: &AppState, user: &AuthUser, turn: PreparedTurn, outcome: TurnOutcome) -> ChatResponse {
    let history_saved = match state
        .sessions
        .append(&turn.session_id, &user.user_id, outcome.new_messages)
        .await
    {
        Ok(stored) => {
            tracing::debug!(session_id = %turn.session_id, appended = stored.len(), "History saved");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, session_id = %turn.session_id, "Could not save chat history");
            false
        }
    };

    let mut warnings = turn.warnings;
    warnings.extend(outcome.warnings);

    ChatResponse {
        session_id: turn.session_id.to_string(),
        reply: outcome.reply.content,
        tool_calls: outcome.tool_calls,
        truncated: outcome.truncated,
        warnings,
        history_saved,
    }
}

fn timeout_error(state: &AppState) -> ApiError {
    ApiError::Timeout(state.request_timeout.as_secs())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider = state.agent.provider();
    let provider_connected = provider.health_check().await.unwrap_or(false);
    let documents = state.knowledge.documents().await.map_or(0, |d| d.len());
    let chunks = state.knowledge.chunk_count().await.unwrap_or(0);

    Json(HealthResponse {
        status: if provider_connected { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        provider: provider.name().to_string(),
        provider_connected,
        embedding_model: state.knowledge.embedding_model().to_string(),
        documents,
        chunks,
    })
}

/// Main chat endpoint (non-streaming)
pub async fn chat(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let turn = prepare_turn(&state, &user, &request).await?;
    tracing::info!(user_id = %user.user_id, session_id = %turn.session_id, "Chat turn");

    let outcome = tokio::time::timeout(state.request_timeout, state.agent.run(&turn.history, request.message))
        .await
        .map_err(|_| timeout_error(&state))??;

    Ok(Json(finish_turn(&state, &user, turn, outcome).await))
}

/// WebSocket streaming chat
pub async fn chat_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state, user))
}

type WsSender = SplitSink<WebSocket, WsMessage>;

async fn send_frame(sender: &mut WsSender, frame: &StreamFrame) -> bool {
    let Ok(text) = serde_json::to_string(frame) else {
        return false;
    };
    sender.send(WsMessage::Text(text.into())).await.is_ok()
}

async fn handle_stream(socket: WebSocket, state: AppState, user: AuthUser) {
    let (mut sender, mut receiver) = socket.split();

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket error");
                break;
            }
            _ => continue,
        };

        let connected = match serde_json::from_str::<ChatRequest>(text.as_str()) {
            Ok(request) => stream_turn(&state, &user, request, &mut sender).await,
            Err(e) => {
                let err = ApiError::Validation(format!("Invalid request: {e}"));
                send_frame(&mut sender, &StreamFrame::Error(err.body())).await
            }
        };
        if !connected {
            break;
        }
    }
    tracing::debug!(user_id = %user.user_id, "WebSocket closed");
}

/// Run one turn, forwarding progress frames. Returns whether the client is still there.
async fn stream_turn(state: &AppState, user: &AuthUser, request: ChatRequest, sender: &mut WsSender) -> bool {
    let turn = match prepare_turn(state, user, &request).await {
        Ok(turn) => turn,
        Err(e) => return send_frame(sender, &StreamFrame::Error(e.body())).await,
    };
    tracing::info!(user_id = %user.user_id, session_id = %turn.session_id, "Streaming chat turn");

    let (tx, rx) = mpsc::channel(32);
    let run = tokio::time::timeout(
        state.request_timeout,
        state.agent.run_streaming(&turn.history, request.message, tx),
    );

    let forward = async {
        let mut rx = rx;
        let mut connected = true;
        while let Some(event) = rx.recv().await {
            let frame = match event {
                TurnEvent::Delta(content) => StreamFrame::Chunk { content },
                TurnEvent::Retract => StreamFrame::Reset,
                TurnEvent::ToolStarted { name, .. } => StreamFrame::Tool {
                    status: "started",
                    name,
                    record: None,
                },
                TurnEvent::ToolFinished(record) => StreamFrame::Tool {
                    status: if record.success { "finished" } else { "failed" },
                    name: record.tool.to_string(),
                    record: Some(record),
                },
                // Sent below, once history is saved
                TurnEvent::Done(_) => continue,
            };
            if !send_frame(sender, &frame).await {
                connected = false;
                break;
            }
        }
        connected
    };

    let (result, connected) = tokio::join!(run, forward);
    let outcome = match result.map_err(|_| timeout_error(state)).and_then(|r| r.map_err(ApiError::from)) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(error = %e, "Streaming turn failed");
            return connected && send_frame(sender, &StreamFrame::Error(e.body())).await;
        }
    };

    let response = finish_turn(state, user, turn, outcome).await;
    connected && send_frame(sender, &StreamFrame::Done(response)).await
}

/// Ordered history of one of the caller's sessions
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let session_id = parse_session_id(&query.session_id)?;

    let messages = match state.sessions.history(&session_id).await? {
        Some(session) if !session.is_owned_by(&user.user_id) => {
            return Err(agent_core::AgentError::SessionOwnership(session_id.to_string()).into());
        }
        Some(session) => session.messages,
        None => Vec::new(),
    };

    Ok(Json(MessagesResponse {
        session_id: session_id.to_string(),
        messages,
    }))
}

/// Delete one of the caller's sessions
pub async fn clear_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<ClearResponse>, ApiError> {
    let session_id = parse_session_id(&query.session_id)?;

    let cleared = match state.sessions.history(&session_id).await? {
        Some(session) if !session.is_owned_by(&user.user_id) => {
            return Err(agent_core::AgentError::SessionOwnership(session_id.to_string()).into());
        }
        Some(_) => state.sessions.clear(&session_id).await?,
        None => false,
    };
    tracing::info!(user_id = %user.user_id, session_id = %session_id, cleared, "Chat history cleared");

    Ok(Json(ClearResponse {
        session_id: session_id.to_string(),
        cleared,
    }))
}

/// The caller's sessions, most recent first
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let sessions = state.sessions.list(&user.user_id, query.limit.clamp(1, 100)).await?;
    Ok(Json(SessionsResponse { sessions }))
}

pub async fn list_documents(State(state): State<AppState>) -> Result<Json<DocumentsResponse>, ApiError> {
    Ok(Json(DocumentsResponse {
        documents: state.knowledge.documents().await?,
        chunk_count: state.knowledge.chunk_count().await?,
    }))
}

pub async fn ingest_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let file_name = request.file_name.trim();
    if file_name.is_empty() || file_name.contains(['/', '\\']) {
        return Err(ApiError::Validation("file_name must be a plain file name".into()));
    }

    let info = state.knowledge.ingest_text(file_name, &request.content).await?;
    tracing::info!(
        user_id = %user.user_id,
        doc_id = %info.id,
        chunks = info.chunk_count,
        "Document ingested"
    );
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(doc_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.knowledge.remove(&doc_id).await? {
        return Err(ApiError::NotFound(format!("Document {doc_id}")));
    }
    tracing::info!(user_id = %user.user_id, doc_id = %doc_id, "Document removed");
    Ok(StatusCode::NO_CONTENT)
}
