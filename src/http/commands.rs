//! `POST /api/agent/{name}/command` and `POST /api/chain/{name}/run` (§6).
//!
//! `AgentRuntime::handle` dispatches by the agent's `mode`/`prompt_name`
//! *settings* (`agent_runtime.rs`), not by fields on `HandleRequest`, and
//! `AgentSnapshot` has no setters. So both handlers here fetch the mutable
//! `Agent` from `AgentStore`, clone-and-override the two settings the path
//! parameter determines, then snapshot — the HTTP layer stays a pure
//! consumer of the existing mode-dispatch contract.

use super::{error_response, run_with_deadline, AppState};
use crate::agent_runtime::HandleRequest;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub tenant_id: String,
    pub command_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default = "default_conversation_name")]
    pub conversation_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ChainRunRequest {
    pub tenant_id: String,
    pub user_input: String,
    #[serde(default = "default_conversation_name")]
    pub conversation_name: String,
    /// Per-step substitution overrides (§6), merged last-wins into every
    /// `prompt_type = prompt` step's `PromptInputs.overrides`.
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_conversation_name() -> String {
    "default".to_string()
}

/// `{name}` here is the *agent* name, per §6's endpoint table; the actual
/// command name travels in the request body.
pub async fn run_command(
    State(state): State<AppState>,
    Path(agent_name): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Response {
    let Some(mut agent) = state.agents.get(&request.tenant_id, &agent_name).await else {
        return (axum::http::StatusCode::NOT_FOUND, Json(json!({"error": "unknown agent"}))).into_response();
    };
    agent.set_setting("mode", "command");
    agent.set_setting("prompt_name", request.command_name.as_str());

    let handle_request = HandleRequest {
        agent: agent.snapshot(),
        conversation_name: request.conversation_name,
        user_input: request.args.to_string(),
        stream: false,
        log_output: true,
        stream_sink: None,
        overrides: HashMap::new(),
    };

    let task_id = format!("command:{}:{}:{}", request.tenant_id, agent_name, uuid::Uuid::new_v4());
    let runtime = state.runtime.clone();
    match run_with_deadline(&state, task_id, false, async move { runtime.handle(handle_request).await }).await {
        Ok(response) => Json(json!({"result": response.text, "tool_calls_made": response.tool_calls_made})).into_response(),
        Err(err) => error_response(err),
    }
}

/// `{name}` is the chain name. `overrides` carries §6's "optional per-step
/// overrides", threaded through to every `prompt_type = prompt` step's
/// `PromptInputs.overrides`.
pub async fn run_chain(
    State(state): State<AppState>,
    Path(chain_name): Path<String>,
    Json(request): Json<ChainRunRequest>,
) -> Response {
    let Some(mut agent) = state.agents.get(&request.tenant_id, &default_agent_name(&chain_name)).await else {
        return (axum::http::StatusCode::NOT_FOUND, Json(json!({"error": "unknown agent for this chain"}))).into_response();
    };
    agent.set_setting("mode", "chain");
    agent.set_setting("prompt_name", chain_name.as_str());

    let handle_request = HandleRequest {
        agent: agent.snapshot(),
        conversation_name: request.conversation_name,
        user_input: request.user_input,
        stream: false,
        log_output: true,
        stream_sink: None,
        overrides: request.overrides,
    };

    // Chain runs count against the §5 heavy-task concurrency ceiling —
    // they drive the autonomous step loop, unlike a single prompt/command turn.
    let task_id = format!("chain:{}:{}:{}", request.tenant_id, chain_name, uuid::Uuid::new_v4());
    let runtime = state.runtime.clone();
    match run_with_deadline(&state, task_id, true, async move { runtime.handle(handle_request).await }).await {
        Ok(response) => Json(json!({"result": response.text, "tool_calls_made": response.tool_calls_made})).into_response(),
        Err(err) => error_response(err),
    }
}

/// §6's endpoint table names only a chain, not an agent, in the run route —
/// a chain run still needs *some* `Agent` to carry settings/enabled-commands
/// for its steps, so this resolves to an agent sharing the chain's name,
/// the same "name doubles as its own default agent" convention `chain.rs`
/// already uses for a step's empty `agent_name` (`effective_agent`).
fn default_agent_name(chain_name: &str) -> String {
    chain_name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;

    #[test]
    fn default_agent_name_echoes_the_chain_name() {
        assert_eq!(default_agent_name("greet"), "greet");
    }

    #[test]
    fn command_request_args_default_to_null() {
        let request: CommandRequest = serde_json::from_str(r#"{"tenant_id":"t1","command_name":"echo"}"#).unwrap();
        assert!(request.args.is_null());
        assert_eq!(request.conversation_name, "default");
        let _ = Agent::new("t1", "a1");
    }
}
