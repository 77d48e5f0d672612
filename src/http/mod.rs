//! HTTP surface (§4.12, §6), feature `server`.
//!
//! Grounded on `mcp_server_builder.rs` / `mcp_http_adapter.rs`'s
//! route-closure-with-extracted-state idiom. Unlike `AxumHttpAdapter`,
//! which sits behind a swappable `HttpServerAdapter` trait because the MCP
//! server supports multiple transports, this crate has exactly one HTTP
//! transport, so the router is built directly as a typed
//! `axum::Router<AppState>` instead of behind a trait object. Bearer-token
//! auth generalizes `mcp_server_builder_utils.rs::AuthConfig::validate`'s
//! `subtle::ConstantTimeEq` comparison into an `axum::middleware::from_fn`
//! layer, the direct analogue of `with_bearer_token`.

mod auth;
mod chat;
mod commands;
mod conversation;
mod introspection;
mod prompts;

use crate::agent::AgentStore;
use crate::agent_runtime::AgentRuntime;
use crate::chain::ChainStore;
use crate::conversation::ConversationStore;
use crate::dispatcher::CommandDispatcher;
use crate::error::{CallerVisibility, ChainError};
use crate::prompt::PromptTemplateStore;
use crate::provider_registry::ProviderRegistry;
use crate::task_registry::TaskRegistry;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Everything a request handler needs, cloned cheaply (every field is
/// `Arc`-backed or itself a handle type) into `axum::extract::State` per
/// request (§4.12).
#[derive(Clone)]
pub struct AppState {
    pub bearer_token: Option<Arc<String>>,
    pub runtime: Arc<AgentRuntime>,
    pub agents: AgentStore,
    pub conversations: ConversationStore,
    pub prompts: PromptTemplateStore,
    pub chains: ChainStore,
    pub dispatcher: Arc<CommandDispatcher>,
    pub providers: ProviderRegistry,
    /// §4.11/§5's active-task monitor: enforces the heavy-task concurrency
    /// ceiling and evicts requests that overrun their deadline.
    pub task_registry: TaskRegistry,
    /// §5's overall request deadline, applied per call in [`run_with_deadline`].
    pub request_deadline: Duration,
}

/// Runs `fut` under a [`TaskRegistry`] guard, racing it against the guard's
/// deadline sweep (§5: "deadline expiry cancels provider/MemoryStore/sandbox
/// calls"). `heavy` marks chain runs against the concurrency ceiling; plain
/// prompt/command turns do not count against it.
pub(crate) async fn run_with_deadline<F, T>(
    state: &AppState,
    task_id: String,
    heavy: bool,
    fut: F,
) -> Result<T, ChainError>
where
    F: std::future::Future<Output = Result<T, ChainError>>,
{
    let guard = state.task_registry.begin(task_id, state.request_deadline, heavy).await?;
    tokio::select! {
        result = fut => result,
        _ = guard.cancel.cancelled() => Err(ChainError::DeadlineExceeded),
    }
}

/// Maps any [`CallerVisibility`] error to the §7 status code, with the
/// §7 "model fault" carve-out: an error the model itself caused (a failed
/// tool call, a failed chain step) still returns 200 with error-flagged
/// JSON so a chat client can render it as an assistant turn rather than an
/// HTTP failure.
pub(crate) fn error_response<E>(err: E) -> Response
where
    E: std::fmt::Display + CallerVisibility,
{
    let status = if err.is_model_fault() {
        StatusCode::OK
    } else {
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    };
    (status, Json(json!({"error": err.to_string(), "model_fault": err.is_model_fault()}))).into_response()
}

/// Builds the full router (§6's endpoint table). Bearer-token auth is
/// layered over every route when `state.bearer_token` is set; an unset
/// token means the deployment relies on a reverse proxy or is running
/// locally for development, matching `AuthConfig::None`'s pass-through.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/api/agent/{name}/command", post(commands::run_command))
        .route("/api/chain/{name}/run", post(commands::run_chain))
        .route("/api/extensions", get(introspection::list_extensions))
        .route("/api/extensions/{name}/args", get(introspection::extension_args))
        .route("/api/extensions/{name}/settings", get(introspection::extension_settings))
        .route("/api/provider", get(introspection::list_providers))
        .route("/api/provider/{name}", get(introspection::provider_detail))
        .route("/api/providers", get(introspection::list_providers))
        .route("/api/providers/service/{service}", get(introspection::providers_for_service))
        .route("/v1/prompt", get(prompts::list_prompts).post(prompts::create_prompt))
        .route(
            "/v1/prompt/{id}",
            get(prompts::get_prompt).put(prompts::update_prompt).delete(prompts::delete_prompt),
        )
        .route(
            "/api/conversation/{tenant}/{agent}/{name}",
            get(conversation::export_conversation).delete(conversation::delete_conversation),
        )
        .route("/api/conversation/{tenant}/{agent}/{name}/messages", post(conversation::append_message))
        .route(
            "/api/conversation/{tenant}/{agent}/{name}/messages/{id}",
            put(conversation::update_message).delete(conversation::delete_message),
        )
        .route("/api/conversation/{tenant}/{agent}/{name}/rename", post(conversation::rename_conversation))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer_token));

    protected.with_state(state)
}
