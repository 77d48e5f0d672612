//! Bearer-token auth middleware (§4.12, §6), generalizing
//! `mcp_server_builder_utils.rs::AuthConfig::validate`'s constant-time
//! comparison. Unlike the teacher, which hashes the presented token with
//! `Sha256` before comparing digests, this compares the raw token bytes
//! directly with `subtle::ConstantTimeEq` — `sha2` has no other consumer
//! in this crate (see `DESIGN.md`), and a digest buys nothing once the
//! stored token itself is already held in memory rather than on disk.

use super::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

const BEARER_PREFIX: &str = "Bearer ";

/// Passes every request through unchanged when `state.bearer_token` is
/// unset (§6: no token configured means auth is delegated to a reverse
/// proxy or the deployment is local/development). Otherwise requires an
/// `Authorization: Bearer <token>` header whose value matches in constant
/// time.
pub async fn require_bearer_token(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = &state.bearer_token else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX));

    match presented {
        Some(token) if token.as_bytes().ct_eq(expected.as_bytes()).into() => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentStore;
    use crate::agent_runtime::AgentRuntime;
    use crate::chain::ChainStore;
    use crate::conversation::ConversationStore;
    use crate::dispatcher::CommandDispatcher;
    use crate::event::NullEventHandler;
    use crate::extension_registry::ExtensionRegistry;
    use crate::prompt::PromptTemplateStore;
    use crate::provider_registry::ProviderRegistry;
    use crate::provider_router::ProviderRouter;
    use crate::task_registry::TaskRegistry;
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn state_with_token(token: Option<&str>) -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(CommandDispatcher::new(ExtensionRegistry::new()));
        let runtime = AgentRuntime::new(
            ProviderRouter::new(ProviderRegistry::new()),
            dispatcher.clone(),
            ConversationStore::new(dir.path()),
            PromptTemplateStore::new(),
            None,
            Arc::new(NullEventHandler),
            ChainStore::new(),
            5,
            8,
            AgentStore::new(),
        );
        AppState {
            bearer_token: token.map(|t| Arc::new(t.to_string())),
            runtime,
            agents: AgentStore::new(),
            conversations: ConversationStore::new(dir.path()),
            prompts: PromptTemplateStore::new(),
            chains: ChainStore::new(),
            dispatcher,
            providers: ProviderRegistry::new(),
            task_registry: TaskRegistry::new(3),
            request_deadline: std::time::Duration::from_secs(900),
        }
    }

    fn probe_router(state: AppState) -> Router {
        Router::new()
            .route("/probe", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token))
            .with_state(state)
    }

    #[tokio::test]
    async fn unset_token_passes_every_request() {
        let app = probe_router(state_with_token(None).await);
        let response = app
            .oneshot(Request::builder().uri("/probe").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn matching_bearer_token_is_accepted() {
        let app = probe_router(state_with_token(Some("secret")).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/probe")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_or_wrong_token_is_rejected() {
        let app = probe_router(state_with_token(Some("secret")).await);
        let response = app
            .oneshot(Request::builder().uri("/probe").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let app = probe_router(state_with_token(Some("secret")).await);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/probe")
                    .header("Authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
