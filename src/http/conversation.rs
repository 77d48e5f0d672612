//! Conversation CRUD under `/api/conversation/{tenant}/{agent}/{name}/...`
//! (§6), backed directly by `ConversationStore`'s existing methods.

use super::{error_response, AppState};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

type ScopePath = Path<(String, String, String)>;
type MessagePath = Path<(String, String, String, u64)>;

pub async fn export_conversation(State(state): State<AppState>, Path((tenant, agent, name)): ScopePath) -> Response {
    match state.conversations.export(&tenant, &agent, &name).await {
        Ok(interactions) => Json(interactions).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn delete_conversation(State(state): State<AppState>, Path((tenant, agent, name)): ScopePath) -> Response {
    match state.conversations.delete_conversation(&tenant, &agent, &name).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub role: String,
    pub message: String,
    #[serde(default)]
    pub error: bool,
}

pub async fn append_message(
    State(state): State<AppState>,
    Path((tenant, agent, name)): ScopePath,
    Json(request): Json<AppendMessageRequest>,
) -> Response {
    match state
        .conversations
        .append(&tenant, &agent, &name, &request.role, &request.message, request.error)
        .await
    {
        Ok(interaction) => Json(interaction).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageRequest {
    pub message: String,
}

pub async fn update_message(
    State(state): State<AppState>,
    Path((tenant, agent, name, id)): MessagePath,
    Json(request): Json<UpdateMessageRequest>,
) -> Response {
    match state.conversations.update_message(&tenant, &agent, &name, id, &request.message).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn delete_message(State(state): State<AppState>, Path((tenant, agent, name, id)): MessagePath) -> Response {
    match state.conversations.delete_message(&tenant, &agent, &name, id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    pub new_name: String,
}

pub async fn rename_conversation(
    State(state): State<AppState>,
    Path((tenant, agent, name)): ScopePath,
    Json(request): Json<RenameConversationRequest>,
) -> Response {
    match state.conversations.rename(&tenant, &agent, &name, &request.new_name).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}
