use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::model_selection::{provider_defaults, ModelSelection};
use crate::orchestrator::trace::{ConversationMessage, Role};
use crate::service::{ChatResponse, ChatService};

#[derive(Clone)]
pub struct ServerState {
    pub service: Arc<ChatService>,
    /// Cancelled on shutdown; every chat turn runs under a child token
    pub shutdown: CancellationToken,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    content: String,
}

/// Either a single `message`, or a client-held transcript in `messages`
/// whose last entry is the new user message.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: Option<String>,
    #[serde(default)]
    messages: Vec<IncomingMessage>,
}

#[derive(Debug, Serialize)]
struct ClearHistoryResponse {
    deleted: usize,
}

#[derive(Debug, Deserialize)]
struct UpdateModelRequest {
    provider: String,
    model: Option<String>,
    base_url: Option<String>,
}

pub fn router(state: Arc<ServerState>) -> Router {
    let api = Router::new()
        .route("/chat", post(chat))
        .route("/chat/history", get(get_history).delete(clear_history))
        .route("/model", get(get_model).put(update_model));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
}

pub async fn serve(bind_addr: &str, service: Arc<ChatService>) -> Result<()> {
    let bind_addr = bind_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid bind address '{}' (expected host:port)", bind_addr))?;

    let shutdown = CancellationToken::new();
    let state = Arc::new(ServerState {
        service,
        shutdown: shutdown.clone(),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind scheduler server to {}", bind_addr))?;
    tracing::info!("Scheduler assistant listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("Shutting down, cancelling in-flight chat turns");
            shutdown.cancel();
        })
        .await
        .context("Scheduler server failed")?;
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn chat(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let (text, prior) = split_chat_request(body)?;
    let cancel = state.shutdown.child_token();
    state
        .service
        .handle_message(&text, prior, &cancel)
        .await
        .map(Json)
        .map_err(internal_error)
}

async fn get_history(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ConversationMessage>>, (StatusCode, String)> {
    let limit = clamp_limit(query.limit, 50, 1, 500);
    state.service.history(limit).map(Json).map_err(internal_error)
}

async fn clear_history(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ClearHistoryResponse>, (StatusCode, String)> {
    state
        .service
        .clear_history()
        .map(|deleted| Json(ClearHistoryResponse { deleted }))
        .map_err(internal_error)
}

async fn get_model(State(state): State<Arc<ServerState>>) -> Json<ModelSelection> {
    Json(state.service.selection().read().await.clone())
}

async fn update_model(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<UpdateModelRequest>,
) -> Result<Json<ModelSelection>, (StatusCode, String)> {
    let provider = body.provider.trim().to_ascii_lowercase();
    if provider_defaults(&provider).is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("unknown provider '{}'", body.provider),
        ));
    }

    let mut selection = ModelSelection::for_provider(&provider);
    if let Some(model) = body.model.filter(|m| !m.trim().is_empty()) {
        selection.model = model.trim().to_string();
    }
    selection.base_url = body.base_url;
    let selection = selection.normalized();

    let handle = state.service.selection();
    *handle.write().await = selection.clone();
    tracing::info!(
        "Model selection changed to {} / {}",
        selection.provider,
        selection.model
    );
    Ok(Json(selection))
}

fn split_chat_request(
    body: ChatRequest,
) -> Result<(String, Option<Vec<ConversationMessage>>), (StatusCode, String)> {
    if let Some(message) = body.message.filter(|m| !m.trim().is_empty()) {
        return Ok((message, None));
    }

    let mut transcript = Vec::with_capacity(body.messages.len());
    for incoming in body.messages {
        let Some(role) = Role::parse(&incoming.role) else {
            return Err(bad_request(format!("unsupported role '{}'", incoming.role)));
        };
        transcript.push(match role {
            Role::User => ConversationMessage::user(incoming.content),
            Role::Assistant => ConversationMessage::assistant(incoming.content, None),
        });
    }

    match transcript.pop() {
        Some(last) if last.role == Role::User && !last.content.trim().is_empty() => {
            Ok((last.content, Some(transcript)))
        }
        Some(_) => Err(bad_request("the last message must be a non-empty user message".to_string())),
        None => Err(bad_request("message cannot be empty".to_string())),
    }
}

fn clamp_limit(value: Option<usize>, default: usize, min: usize, max: usize) -> usize {
    value.unwrap_or(default).clamp(min, max)
}

fn bad_request(message: String) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, message)
}

fn internal_error(error: anyhow::Error) -> (StatusCode, String) {
    tracing::error!("Request failed: {:#}", error);
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> ChatRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn single_message_uses_stored_history() {
        let (text, prior) =
            split_chat_request(request(serde_json::json!({"message": "hi"}))).unwrap();
        assert_eq!(text, "hi");
        assert!(prior.is_none());
    }

    #[test]
    fn transcript_splits_into_history_and_new_message() {
        let (text, prior) = split_chat_request(request(serde_json::json!({
            "messages": [
                {"role": "user", "content": "add gym"},
                {"role": "assistant", "content": "done"},
                {"role": "user", "content": "thanks"}
            ]
        })))
        .unwrap();
        assert_eq!(text, "thanks");
        let prior = prior.unwrap();
        assert_eq!(prior.len(), 2);
        assert_eq!(prior[1].role, Role::Assistant);
    }

    #[test]
    fn transcript_must_end_with_a_user_message() {
        let err = split_chat_request(request(serde_json::json!({
            "messages": [{"role": "assistant", "content": "hello"}]
        })))
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let err = split_chat_request(request(serde_json::json!({
            "messages": [{"role": "system", "content": "x"}]
        })))
        .unwrap_err();
        assert!(err.1.contains("unsupported role"));

        assert!(split_chat_request(request(serde_json::json!({"message": "  "}))).is_err());
    }

    #[test]
    fn history_limit_is_clamped() {
        assert_eq!(clamp_limit(None, 50, 1, 500), 50);
        assert_eq!(clamp_limit(Some(0), 50, 1, 500), 1);
        assert_eq!(clamp_limit(Some(9999), 50, 1, 500), 500);
    }
}
