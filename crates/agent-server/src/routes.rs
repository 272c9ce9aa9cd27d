//! Router

use axum::{
    Router,
    http::HeaderValue,
    middleware::from_fn_with_state,
    routing::{delete, get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers;
use crate::middleware::{rate_limit, require_auth};
use crate::state::AppState;

pub const CHAT: &str = "/api/v1/chatbot/chat";
pub const CHAT_STREAM: &str = "/api/v1/chatbot/chat/stream";
pub const MESSAGES: &str = "/api/v1/chatbot/messages";
pub const SESSIONS: &str = "/api/v1/chatbot/sessions";
pub const DOCUMENTS: &str = "/api/v1/documents";
pub const DOCUMENT: &str = "/api/v1/documents/{doc_id}";

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| {
                origin
                    .parse::<HeaderValue>()
                    .inspect_err(|_| tracing::warn!(%origin, "Ignoring invalid CORS origin"))
                    .ok()
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Full application router.
///
/// Everything except `/health` requires a bearer token; every route is rate
/// limited.
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let protected = Router::new()
        .route(CHAT, post(handlers::chat))
        .route(CHAT_STREAM, get(handlers::chat_stream))
        .route(MESSAGES, get(handlers::get_messages).delete(handlers::clear_messages))
        .route(SESSIONS, get(handlers::list_sessions))
        .route(DOCUMENTS, get(handlers::list_documents).post(handlers::ingest_document))
        .route(DOCUMENT, delete(handlers::delete_document))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .layer(from_fn_with_state(state.clone(), rate_limit))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use tower::ServiceExt;

    use agent_access::{Claims, RateLimitConfig, RateLimiter, RouteLimit, TokenVerifier};
    use agent_core::mock::ScriptedProvider;
    use agent_core::provider::{Completion, CompletionStream, ModelInfo};
    use agent_core::session::SessionSummary;
    use agent_core::{
        Agent, AgentConfig, AgentError, ChatSession, ChatSessionStore, GenerationOptions, LlmProvider,
        MemorySessionStore, Message, SessionId, StoredMessage,
    };
    use plant_advisor::{HashingEmbedder, KnowledgeBase, PLANT_CARE_PROMPT, RetrievalConfig, tool_table};

    use super::*;

    const SECRET: &str = "test-secret";

    struct Harness {
        state: AppState,
    }

    impl Harness {
        fn new(provider: Arc<dyn LlmProvider>) -> Self {
            let knowledge = Arc::new(KnowledgeBase::in_memory(
                Arc::new(HashingEmbedder::default()),
                RetrievalConfig::default(),
            ));
            let config = AgentConfig {
                system_prompt: PLANT_CARE_PROMPT.into(),
                retry_backoff: Duration::from_millis(1),
                ..AgentConfig::default()
            };
            let agent = Agent::new(provider, Arc::new(tool_table(knowledge.clone())), config);

            Self {
                state: AppState {
                    agent: Arc::new(agent),
                    knowledge,
                    sessions: Arc::new(MemorySessionStore::new()),
                    verifier: Arc::new(TokenVerifier::new(SECRET).unwrap()),
                    limiter: Arc::new(RateLimiter::from_config(&RateLimitConfig::default())),
                    request_timeout: Duration::from_secs(10),
                },
            }
        }

        fn scripted(steps: &[&str]) -> Self {
            Self::new(Arc::new(ScriptedProvider::new(steps.iter().copied())))
        }

        fn token(&self, user: &str) -> String {
            self.state
                .verifier
                .issue(&Claims::new(user, chrono::Duration::hours(1)))
                .unwrap()
        }

        async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
            let response = self.send_raw(method, uri, token, body).await;
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = if bytes.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }

        async fn send_raw(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<serde_json::Value>,
        ) -> axum::response::Response {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let body = match body {
                Some(json) => {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };

            router(self.state.clone(), &[])
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap()
        }
    }

    const LIME_CALL: &str = "```tool\n{\"tool\": \"ph_calculator\", \"arguments\": {\"current_ph\": 5.5, \"target_ph\": 6.5, \"soil_volume_m3\": 2}}\n```";

    #[tokio::test]
    async fn test_health_is_public() {
        let harness = Harness::scripted(&["unused"]);
        harness
            .state
            .knowledge
            .ingest_text("basil.md", "Basil likes warm sun and evenly moist soil.")
            .await
            .unwrap();

        let (status, body) = harness.send("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documents"], 1);
        assert_eq!(body["embedding_model"], "token-hash");
    }

    #[tokio::test]
    async fn test_chat_requires_valid_token() {
        let harness = Harness::scripted(&["unused"]);
        let body = serde_json::json!({"message": "hello"});

        let (status, json) = harness.send("POST", CHAT, None, Some(body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["code"], "UNAUTHORIZED");

        let expired = harness
            .state
            .verifier
            .issue(&Claims::new("alice", chrono::Duration::hours(-1)))
            .unwrap();
        let (status, _) = harness.send("POST", CHAT, Some(&expired), Some(body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let forged = TokenVerifier::new("other-secret")
            .unwrap()
            .issue(&Claims::new("alice", chrono::Duration::hours(1)))
            .unwrap();
        let (status, _) = harness.send("POST", CHAT, Some(&forged), Some(body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_chat_turn_is_persisted() {
        let harness = Harness::scripted(&[LIME_CALL, "Apply 2.6 kg of garden lime, split over two seasons."]);
        let token = harness.token("alice");

        let (status, body) = harness
            .send(
                "POST",
                CHAT,
                Some(&token),
                Some(serde_json::json!({"session_id": "garden-1", "message": "My loam is pH 5.5, I want 6.5 over 2 m3"})),
            )
            .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["session_id"], "garden-1");
        assert_eq!(body["history_saved"], true);
        assert_eq!(body["truncated"], false);
        assert_eq!(body["tool_calls"][0]["tool"], "ph_calculator");
        assert_eq!(body["tool_calls"][0]["success"], true);

        let (status, history) = harness
            .send("GET", &format!("{MESSAGES}?session_id=garden-1"), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let messages = history["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["user", "tool", "assistant"]);
        let seqs: Vec<u64> = messages.iter().map(|m| m["seq"].as_u64().unwrap()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        let (_, sessions) = harness.send("GET", SESSIONS, Some(&token), None).await;
        assert_eq!(sessions["sessions"][0]["id"], "garden-1");

        let (status, cleared) = harness
            .send("DELETE", &format!("{MESSAGES}?session_id=garden-1"), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["cleared"], true);

        let (_, history) = harness
            .send("GET", &format!("{MESSAGES}?session_id=garden-1"), Some(&token), None)
            .await;
        assert!(history["messages"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_private() {
        let harness = Harness::scripted(&["Water in the morning."]);
        let alice = harness.token("alice");
        let mallory = harness.token("mallory");
        let body = serde_json::json!({"session_id": "alice-garden", "message": "When should I water?"});

        let (status, _) = harness.send("POST", CHAT, Some(&alice), Some(body)).await;
        assert_eq!(status, StatusCode::OK);

        let uri = format!("{MESSAGES}?session_id=alice-garden");
        let (status, json) = harness.send("GET", &uri, Some(&mallory), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "FORBIDDEN");

        let (status, _) = harness.send("DELETE", &uri, Some(&mallory), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let hijack = serde_json::json!({"session_id": "alice-garden", "message": "hi"});
        let (status, _) = harness.send("POST", CHAT, Some(&mallory), Some(hijack)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invalid_messages_are_rejected() {
        let harness = Harness::scripted(&["unused"]);
        let token = harness.token("alice");

        for message in ["", "<script>alert(1)</script>", "nul\u{0}byte"] {
            let (status, json) = harness
                .send("POST", CHAT, Some(&token), Some(serde_json::json!({"message": message})))
                .await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{message:?}");
            assert_eq!(json["code"], "VALIDATION_ERROR");
        }

        let long = "a".repeat(20_001);
        let (status, _) = harness
            .send("POST", CHAT, Some(&token), Some(serde_json::json!({"message": long})))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_retry_after() {
        let mut harness = Harness::scripted(&["unused"]);
        harness.state.limiter = Arc::new(
            RateLimiter::new(RouteLimit::per_minute(100)).with_route(MESSAGES, RouteLimit::per_minute(1)),
        );
        let token = harness.token("alice");
        let uri = format!("{MESSAGES}?session_id=s1");

        let first = harness.send_raw("GET", &uri, Some(&token), None).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-ratelimit-remaining"], "0");

        let second = harness.send_raw("GET", &uri, Some(&token), None).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = second.headers()[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!((1..=60).contains(&retry_after));

        // Limits are per user
        let bob = harness.token("bob");
        let other = harness.send_raw("GET", &uri, Some(&bob), None).await;
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stream_frames_add_up_to_reply() {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

        let preamble_call = format!("Let me work that out.\n{LIME_CALL}");
        let harness = Harness::scripted(&[preamble_call.as_str(), "Apply 2.6 kg of garden lime this autumn."]);
        let token = harness.token("alice");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(harness.state.clone(), &[]);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
                .await
                .unwrap();
        });

        // The handshake needs a token too
        assert!(connect_async(format!("ws://{addr}{CHAT_STREAM}")).await.is_err());

        let (mut socket, _) = connect_async(format!("ws://{addr}{CHAT_STREAM}?access_token={token}"))
            .await
            .unwrap();
        let request = serde_json::json!({"session_id": "ws-1", "message": "Loam at pH 5.5, want 6.5 over 2 m3"});
        socket.send(WsMessage::Text(request.to_string().into())).await.unwrap();

        let mut frames = Vec::new();
        while let Some(msg) = socket.next().await {
            let msg = msg.unwrap();
            if !msg.is_text() {
                continue;
            }
            let frame: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
            let done = frame["type"] == "done" || frame["type"] == "error";
            frames.push(frame);
            if done {
                break;
            }
        }

        let kinds: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        let reset = kinds.iter().position(|&k| k == "reset").unwrap();
        let tool = kinds.iter().position(|&k| k == "tool").unwrap();
        assert!(reset < tool, "{kinds:?}");
        assert_eq!(kinds.last(), Some(&"done"));

        let mut shown = String::new();
        for frame in &frames {
            match frame["type"].as_str() {
                Some("chunk") => shown.push_str(frame["content"].as_str().unwrap()),
                Some("reset") => shown.clear(),
                _ => {}
            }
        }
        let done = frames.last().unwrap();
        assert_eq!(shown, done["reply"].as_str().unwrap());
        assert_eq!(done["history_saved"], true);

        let statuses: Vec<&str> = frames
            .iter()
            .filter(|f| f["type"] == "tool")
            .map(|f| f["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["started", "finished"]);

        let stored = harness.state.sessions.history(&SessionId::from_string("ws-1")).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 3);
    }

    struct SlowProvider;

    #[async_trait]
    impl LlmProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn health_check(&self) -> agent_core::Result<bool> {
            Ok(true)
        }

        async fn complete(&self, _messages: &[Message], options: &GenerationOptions) -> agent_core::Result<Completion> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Completion::text(&options.model, "too late"))
        }

        async fn complete_stream(
            &self,
            _messages: &[Message],
            _options: &GenerationOptions,
        ) -> agent_core::Result<CompletionStream> {
            Err(AgentError::Provider("streaming not supported".into()))
        }

        async fn list_models(&self) -> agent_core::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_slow_turn_times_out_without_saving() {
        let mut harness = Harness::new(Arc::new(SlowProvider));
        harness.state.request_timeout = Duration::from_millis(50);
        let token = harness.token("alice");

        let (status, json) = harness
            .send(
                "POST",
                CHAT,
                Some(&token),
                Some(serde_json::json!({"session_id": "slow-1", "message": "Why is my fern brown?"})),
            )
            .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["code"], "TIMEOUT");

        let stored = harness.state.sessions.history(&SessionId::from_string("slow-1")).await.unwrap();
        assert!(stored.is_none());
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl ChatSessionStore for ReadOnlyStore {
        async fn append(&self, _id: &SessionId, _owner: &str, _messages: Vec<Message>) -> agent_core::Result<Vec<StoredMessage>> {
            Err(AgentError::Persistence("database is locked".into()))
        }

        async fn history(&self, _id: &SessionId) -> agent_core::Result<Option<ChatSession>> {
            Ok(None)
        }

        async fn clear(&self, _id: &SessionId) -> agent_core::Result<bool> {
            Ok(false)
        }

        async fn list(&self, _owner: &str, _limit: usize) -> agent_core::Result<Vec<SessionSummary>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_reply_survives_failed_save() {
        let mut harness = Harness::scripted(&["Mist the orchid once a day."]);
        harness.state.sessions = Arc::new(ReadOnlyStore);
        let token = harness.token("alice");

        let (status, body) = harness
            .send("POST", CHAT, Some(&token), Some(serde_json::json!({"message": "Orchid care?"})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reply"], "Mist the orchid once a day.");
        assert_eq!(body["history_saved"], false);
    }

    #[tokio::test]
    async fn test_document_routes() {
        let harness = Harness::scripted(&["unused"]);
        let token = harness.token("admin");

        let (status, info) = harness
            .send(
                "POST",
                DOCUMENTS,
                Some(&token),
                Some(serde_json::json!({
                    "file_name": "roses.md",
                    "content": "Prune roses in late winter.\n\nFeed roses with a balanced fertilizer in spring."
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{info}");
        let doc_id = info["id"].as_str().unwrap().to_string();
        assert!(doc_id.starts_with("roses_"));

        let (status, list) = harness.send("GET", DOCUMENTS, Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["documents"][0]["file_name"], "roses.md");
        assert!(list["chunk_count"].as_u64().unwrap() >= 1);

        let (status, _) = harness
            .send("POST", DOCUMENTS, Some(&token), Some(serde_json::json!({"file_name": "x.pdf", "content": "binary"})))
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let uri = format!("{DOCUMENTS}/{doc_id}");
        let (status, _) = harness.send("DELETE", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, json) = harness.send("DELETE", &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "NOT_FOUND");
    }
}
