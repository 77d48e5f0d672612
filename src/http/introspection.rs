//! `GET /api/extensions...` and `GET /api/provider...` (§6): read-only
//! introspection over the registries already held in `AppState`.

use super::AppState;
use crate::provider::Service;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub async fn list_extensions(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.dispatcher.list_extensions().await)
}

pub async fn extension_args(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.dispatcher.extension_commands(&name).await {
        Some(commands) => Json(commands.iter().map(|c| c.catalog_line()).collect::<Vec<_>>()).into_response(),
        None => (axum::http::StatusCode::NOT_FOUND, Json(json!({"error": "unknown extension"}))).into_response(),
    }
}

pub async fn extension_settings(State(state): State<AppState>, Path(name): Path<String>) -> Json<serde_json::Value> {
    Json(json!({"extension": name, "known": state.dispatcher.extension_settings_known(&name).await}))
}

pub async fn list_providers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.providers.list())
}

pub async fn provider_detail(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.providers.capabilities(&name) {
        Some(services) => {
            let services: Vec<&str> = services.iter().map(Service::as_str).collect();
            Json(json!({"name": name, "services": services})).into_response()
        }
        None => (axum::http::StatusCode::NOT_FOUND, Json(json!({"error": "unknown provider"}))).into_response(),
    }
}

pub async fn providers_for_service(State(state): State<AppState>, Path(service): Path<String>) -> Response {
    let service = match service.as_str() {
        "llm" => Service::Llm,
        "vision" => Service::Vision,
        "tts" => Service::Tts,
        "embeddings" => Service::Embeddings,
        "transcription" => Service::Transcription,
        "translation" => Service::Translation,
        "image" => Service::Image,
        _ => return (axum::http::StatusCode::BAD_REQUEST, Json(json!({"error": "unknown service"}))).into_response(),
    };
    Json(state.providers.providers_for_service(service)).into_response()
}
