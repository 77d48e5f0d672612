//! Request and chain event system (§4.10).
//!
//! Direct generalization of this codebase's `AgentEvent` / `OrchestrationEvent`
//! / `EventHandler` trio to the request-execution pipeline: a single
//! [`EventHandler`] trait with two default no-op methods, wrapped in
//! `Arc<dyn EventHandler>` and threaded through [`crate::agent_runtime::AgentRuntime`],
//! [`crate::chain::ChainEngine`], and [`crate::provider_router::ProviderRouter`]
//! construction.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentforge::event::{EventHandler, RequestEvent, ChainEvent};
//! use async_trait::async_trait;
//!
//! struct Logger;
//!
//! #[async_trait]
//! impl EventHandler for Logger {
//!     async fn on_request_event(&self, event: &RequestEvent) {
//!         println!("{:?}", event);
//!     }
//!     async fn on_chain_event(&self, event: &ChainEvent) {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

use crate::provider::TokenUsage;
use async_trait::async_trait;

/// Events emitted by [`crate::agent_runtime::AgentRuntime`] during one
/// request's lifecycle (§4.6).
///
/// # Event flow (tool-loop request)
///
/// ```text
/// RequestStarted
///   LLMCallStarted { iteration: 1 }
///   LLMCallCompleted { iteration: 1 }
///   ToolCallDetected { iteration: 1 }
///   ToolExecutionCompleted { iteration: 1 }
///   LLMCallStarted { iteration: 2 }
///   LLMCallCompleted { iteration: 2 }
/// RequestCompleted
/// ```
#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// Fired at the start of `AgentRuntime::handle`.
    RequestStarted {
        tenant_id: String,
        agent_name: String,
        /// First ~120 characters of the user message.
        message_preview: String,
    },

    /// Fired when a request completes, successfully or with an error
    /// surfaced to the caller.
    RequestCompleted {
        tenant_id: String,
        agent_name: String,
        tokens_used: Option<TokenUsage>,
        tool_calls_made: usize,
        response_length: usize,
    },

    /// Fired before each provider round-trip inside the tool loop.
    LLMCallStarted {
        tenant_id: String,
        agent_name: String,
        /// 1-based iteration counter (1 = initial call, 2+ = tool follow-ups).
        iteration: usize,
    },

    /// Fired after each provider round-trip completes.
    LLMCallCompleted {
        tenant_id: String,
        agent_name: String,
        iteration: usize,
        tokens_used: Option<TokenUsage>,
        response_length: usize,
    },

    /// A tool-call sentinel was parsed out of the accumulated response text.
    ToolCallDetected {
        tenant_id: String,
        agent_name: String,
        command_name: String,
        args: serde_json::Value,
        iteration: usize,
    },

    /// A dispatched command finished (success or failure).
    ToolExecutionCompleted {
        tenant_id: String,
        agent_name: String,
        command_name: String,
        success: bool,
        error: Option<String>,
        iteration: usize,
    },

    /// The tool loop hit its configured maximum iteration count (§4.6, §8).
    ToolMaxIterationsReached {
        tenant_id: String,
        agent_name: String,
        max_iterations: usize,
    },

    /// An interaction was appended to the conversation log.
    InteractionAppended {
        tenant_id: String,
        agent_name: String,
        conversation_name: String,
        role: String,
        id: u64,
    },

    /// The provider-rotation router retried or rotated within this request.
    ProviderRotated {
        tenant_id: String,
        agent_name: String,
        from_provider: String,
        to_provider: Option<String>,
        reason: String,
    },
}

/// Events emitted by [`crate::chain::ChainEngine`] during a chain run (§4.5).
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A chain run has started.
    ChainStarted {
        chain_name: String,
        run_id: String,
        step_count: usize,
    },

    /// A chain run reached a terminal state (`Done`, `Failed`, or `Cancelled`).
    ChainCompleted {
        chain_name: String,
        run_id: String,
        terminal_state: String,
    },

    /// A step is about to execute, after argument materialization.
    StepStarted {
        chain_name: String,
        run_id: String,
        step_number: u32,
        prompt_type: String,
    },

    /// A step finished (success or failure).
    StepCompleted {
        chain_name: String,
        run_id: String,
        step_number: u32,
        success: bool,
        error: Option<String>,
    },
}

/// Trait for receiving request and chain events.
///
/// Both methods default to no-ops; override only what you need. The
/// `Send + Sync` bound allows sharing via `Arc<dyn EventHandler>` across
/// tokio tasks.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called when `AgentRuntime` emits an event.
    async fn on_request_event(&self, _event: &RequestEvent) {}

    /// Called when `ChainEngine` emits an event.
    async fn on_chain_event(&self, _event: &ChainEvent) {}
}

/// No-op handler used as the default when nobody registers one.
pub struct NullEventHandler;

#[async_trait]
impl EventHandler for NullEventHandler {}

/// Logs every event at `info` (or `error` for failures), the same level
/// orchestration.rs's inline `log::info!`/`log::error!` calls use for an
/// agent-team run. Used as the HTTP surface's default handler so a deployed
/// server has request/chain visibility without wiring a custom sink.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_request_event(&self, event: &RequestEvent) {
        match event {
            RequestEvent::RequestStarted { tenant_id, agent_name, message_preview } => {
                log::info!("[{tenant_id}/{agent_name}] request started: {message_preview:?}");
            }
            RequestEvent::RequestCompleted { tenant_id, agent_name, tool_calls_made, response_length, .. } => {
                log::info!(
                    "[{tenant_id}/{agent_name}] request completed: {tool_calls_made} tool call(s), {response_length} byte response"
                );
            }
            RequestEvent::ToolExecutionCompleted { tenant_id, agent_name, command_name, success, error, .. } => {
                if *success {
                    log::info!("[{tenant_id}/{agent_name}] tool '{command_name}' succeeded");
                } else {
                    log::error!("[{tenant_id}/{agent_name}] tool '{command_name}' failed: {error:?}");
                }
            }
            RequestEvent::ToolMaxIterationsReached { tenant_id, agent_name, max_iterations } => {
                log::error!("[{tenant_id}/{agent_name}] tool loop hit its {max_iterations}-iteration cap");
            }
            RequestEvent::ProviderRotated { tenant_id, agent_name, from_provider, to_provider, reason } => {
                log::info!("[{tenant_id}/{agent_name}] provider rotated {from_provider} -> {to_provider:?}: {reason}");
            }
            _ => {}
        }
    }

    async fn on_chain_event(&self, event: &ChainEvent) {
        match event {
            ChainEvent::ChainStarted { chain_name, run_id, step_count } => {
                log::info!("chain '{chain_name}' ({run_id}) started: {step_count} step(s)");
            }
            ChainEvent::ChainCompleted { chain_name, run_id, terminal_state } => {
                log::info!("chain '{chain_name}' ({run_id}) completed: {terminal_state}");
            }
            ChainEvent::StepCompleted { chain_name, run_id, step_number, success, error } => {
                if *success {
                    log::info!("chain '{chain_name}' ({run_id}) step {step_number} succeeded");
                } else {
                    log::error!("chain '{chain_name}' ({run_id}) step {step_number} failed: {error:?}");
                }
            }
            _ => {}
        }
    }
}
