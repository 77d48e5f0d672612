//! Process entry point for the HTTP surface (§6), behind the `server`
//! feature. Loads `ServerConfig` from the environment, wires the registries
//! together the same way `AgentRuntime::new` and `http::AppState` already
//! expect, and serves `http::build_router` on `BIND_ADDR`.
//!
//! Exit codes per §6: `0` success, `1` configuration error, `2` runtime
//! failure.

use agentforge::agent::AgentStore;
use agentforge::chain::ChainStore;
use agentforge::conversation::ConversationStore;
use agentforge::dispatcher::CommandDispatcher;
use agentforge::event::LoggingEventHandler;
use agentforge::extension_registry::ExtensionRegistry;
use agentforge::http::{build_router, AppState};
use agentforge::prompt::PromptTemplateStore;
use agentforge::provider_registry::ProviderRegistry;
use agentforge::provider_router::ProviderRouter;
use agentforge::task_registry::TaskRegistry;
use agentforge::AgentRuntime;
use agentforge::ServerConfig;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    let log_level = config.log_level.parse().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new().filter_level(log_level).init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("server failed: {err}");
            ExitCode::from(2)
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Arc::new(CommandDispatcher::new(ExtensionRegistry::new()));
    let providers = ProviderRegistry::new();
    let events = Arc::new(LoggingEventHandler);
    let agents = AgentStore::new();

    let runtime = AgentRuntime::new(
        ProviderRouter::new(providers.clone()),
        dispatcher.clone(),
        ConversationStore::new(&config.working_directory),
        PromptTemplateStore::new(),
        None,
        events,
        ChainStore::new(),
        config.max_tool_loop_iterations,
        config.max_chain_recursion_depth,
        agents.clone(),
    );

    let state = AppState {
        bearer_token: config.agent_api_key.map(Arc::new),
        runtime,
        agents,
        conversations: ConversationStore::new(&config.working_directory),
        prompts: PromptTemplateStore::new(),
        chains: ChainStore::new(),
        dispatcher,
        providers,
        task_registry: TaskRegistry::new(config.max_concurrent_heavy_tasks),
        request_deadline: config.request_deadline,
    };

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    log::info!("listening on {}", config.bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}
