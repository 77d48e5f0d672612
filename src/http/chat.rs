//! `POST /v1/chat/completions` (§6): an OpenAI-compatible entry point onto
//! `AgentRuntime::handle` in `mode = prompt`.
//!
//! OpenAI's own request schema has no notion of tenants or named agents, so
//! this crate's multi-tenancy (§3) rides alongside the standard `messages`
//! array as extra fields rather than inside it — the same "generalize the
//! wire shape, don't fight it" approach the teacher takes when adapting
//! `client_wrapper.rs`'s `Message`/`Role` to a vendor's JSON.

use super::{error_response, run_with_deadline, AppState};
use crate::agent_runtime::HandleRequest;
use crate::streaming::StreamFrame;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    pub tenant_id: String,
    pub agent_name: String,
    #[serde(default = "default_conversation_name")]
    pub conversation_name: String,
}

fn default_conversation_name() -> String {
    "default".to_string()
}

impl ChatCompletionRequest {
    /// The last `role = "user"` message's content; conversation history
    /// itself already lives in `ConversationStore`, so only the latest
    /// turn needs to travel in the request body (§4.3).
    fn latest_user_input(&self) -> Option<&str> {
        self.messages.iter().rev().find(|m| m.role == "user").map(|m| m.content.as_str())
    }
}

#[derive(Serialize)]
struct ChatCompletionChoice {
    index: usize,
    message: ChatCompletionMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionResponse {
    object: &'static str,
    model: String,
    choices: Vec<ChatCompletionChoice>,
}

pub async fn chat_completions(State(state): State<AppState>, Json(request): Json<ChatCompletionRequest>) -> Response {
    let Some(user_input) = request.latest_user_input() else {
        return (axum::http::StatusCode::BAD_REQUEST, Json(json!({"error": "no user message in 'messages'"})))
            .into_response();
    };

    let Some(agent) = state.agents.snapshot(&request.tenant_id, &request.agent_name).await else {
        return (axum::http::StatusCode::NOT_FOUND, Json(json!({"error": "unknown agent"}))).into_response();
    };

    if request.stream {
        return stream_chat_completion(state, agent, request.conversation_name, user_input.to_string()).await;
    }

    let handle_request = HandleRequest {
        agent: agent.clone(),
        conversation_name: request.conversation_name,
        user_input: user_input.to_string(),
        stream: false,
        log_output: true,
        stream_sink: None,
        overrides: std::collections::HashMap::new(),
    };

    let task_id = format!("chat:{}:{}:{}", request.tenant_id, request.agent_name, uuid::Uuid::new_v4());
    let runtime = state.runtime.clone();
    match run_with_deadline(&state, task_id, false, async move { runtime.handle(handle_request).await }).await {
        Ok(response) => Json(ChatCompletionResponse {
            object: "chat.completion",
            model: agent.agent_name.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionMessage { role: "assistant", content: response.text },
                finish_reason: "stop",
            }],
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn stream_chat_completion(
    state: AppState,
    agent: crate::agent::AgentSnapshot,
    conversation_name: String,
    user_input: String,
) -> Response {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let runtime = state.runtime.clone();
    let task_id = format!("chat-stream:{}:{}:{}", agent.tenant_id, agent.agent_name, uuid::Uuid::new_v4());
    let stream_tx = tx.clone();
    tokio::spawn(async move {
        let result = run_with_deadline(&state, task_id, false, async move {
            runtime
                .handle(HandleRequest {
                    agent,
                    conversation_name,
                    user_input,
                    stream: true,
                    log_output: true,
                    stream_sink: Some(tx),
                    overrides: std::collections::HashMap::new(),
                })
                .await
        })
        .await;
        if let Err(err) = result {
            let _ = stream_tx.send(StreamFrame::Error(err.to_string()));
        }
    });

    let frames = UnboundedReceiverStream::new(rx).map(|frame| {
        let event = match frame {
            StreamFrame::Delta(delta) => Event::default().json_data(json!({
                "object": "chat.completion.chunk",
                "choices": [{"index": 0, "delta": {"content": delta.content}, "finish_reason": delta.finish_reason}],
            })),
            StreamFrame::Error(message) => Event::default().json_data(json!({"error": message})),
            StreamFrame::Done => Ok(Event::default().data("[DONE]")),
        };
        Ok::<Event, std::convert::Infallible>(event.unwrap_or_else(|_: axum::Error| Event::default().data("[DONE]")))
    });

    Sse::new(frames).keep_alive(KeepAlive::default()).into_response()
}
