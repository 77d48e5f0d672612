//! `/v1/prompt[/{id}]` CRUD (§6), backed by `PromptTemplateStore`. A
//! template is addressed by `(category, name)`; path-param routes encode
//! both as one `id` of the form `"{category}:{name}"`.

use super::AppState;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

fn split_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(':')
}

#[derive(Serialize)]
struct PromptSummary {
    category: String,
    name: String,
}

pub async fn list_prompts(State(state): State<AppState>) -> Json<Vec<PromptSummary>> {
    Json(
        state
            .prompts
            .list()
            .await
            .into_iter()
            .map(|(category, name)| PromptSummary { category, name })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
pub struct CreatePromptRequest {
    pub category: String,
    pub name: String,
    pub template: String,
}

pub async fn create_prompt(State(state): State<AppState>, Json(request): Json<CreatePromptRequest>) -> Response {
    state.prompts.register(request.category.clone(), request.name.clone(), request.template).await;
    Json(PromptSummary { category: request.category, name: request.name }).into_response()
}

pub async fn get_prompt(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some((category, name)) = split_id(&id) else {
        return (axum::http::StatusCode::BAD_REQUEST, Json(json!({"error": "id must be 'category:name'"}))).into_response();
    };
    match state.prompts.get(category, name).await {
        Some(template) => Json(json!({"category": category, "name": name, "template": template})).into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, Json(json!({"error": "unknown prompt template"}))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdatePromptRequest {
    pub template: String,
}

pub async fn update_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdatePromptRequest>,
) -> Response {
    let Some((category, name)) = split_id(&id) else {
        return (axum::http::StatusCode::BAD_REQUEST, Json(json!({"error": "id must be 'category:name'"}))).into_response();
    };
    state.prompts.register(category, name, request.template).await;
    axum::http::StatusCode::NO_CONTENT.into_response()
}

pub async fn delete_prompt(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some((category, name)) = split_id(&id) else {
        return (axum::http::StatusCode::BAD_REQUEST, Json(json!({"error": "id must be 'category:name'"}))).into_response();
    };
    if state.prompts.delete(category, name).await {
        axum::http::StatusCode::NO_CONTENT.into_response()
    } else {
        (axum::http::StatusCode::NOT_FOUND, Json(json!({"error": "unknown prompt template"}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_id_rejects_missing_colon() {
        assert_eq!(split_id("default:greeting"), Some(("default", "greeting")));
        assert!(split_id("no-colon-here").is_none());
    }
}
