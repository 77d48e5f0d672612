//! `CommandDispatcher` (§4.2).
//!
//! Grounded on `tool_protocol.rs::ToolRegistry::execute_tool` (resolve name
//! -> protocol, then call `execute`) and `agent.rs`'s tool-call-to-result
//! flow, which logs the tool's output back into the conversation exactly
//! once regardless of how the call turned out.

use crate::agent::AgentSnapshot;
use crate::error::DispatchError;
use crate::extension::{ArgumentDescriptor, ArgumentType, CommandDescriptor};
use crate::extension_registry::ExtensionRegistry;
use async_trait::async_trait;
use std::collections::HashMap;

/// Where the dispatcher records the outcome of a command invocation, once,
/// regardless of success or failure (§4.2 "logged as tool:<name> exactly
/// once even on early failure"). `AgentRuntime`/`ChainEngine` implement
/// this against `ConversationStore`.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    async fn record_tool_call(&self, command_name: &str, args: &serde_json::Value, outcome: &str, is_error: bool);
}

/// A sink that drops every record; useful for callers that don't need the
/// conversation-append side effect (tests, dry runs).
pub struct NullDispatchSink;

#[async_trait]
impl DispatchSink for NullDispatchSink {
    async fn record_tool_call(&self, _command_name: &str, _args: &serde_json::Value, _outcome: &str, _is_error: bool) {}
}

/// Binds raw caller-supplied arguments against a [`CommandDescriptor`],
/// applying defaults, rejecting missing required arguments, and rejecting
/// unexpected keys unless the descriptor allows a catch-all (§4.2 argument
/// binding).
fn bind_arguments(
    descriptor: &CommandDescriptor,
    raw: &HashMap<String, serde_json::Value>,
) -> Result<HashMap<String, serde_json::Value>, DispatchError> {
    let mut bound = HashMap::new();
    let declared: Vec<&str> = descriptor.arguments.iter().map(|a| a.name.as_str()).collect();

    for arg in &descriptor.arguments {
        match raw.get(&arg.name) {
            Some(value) => {
                check_type(descriptor, arg, value)?;
                bound.insert(arg.name.clone(), value.clone());
            }
            None => match &arg.default {
                Some(default) => {
                    bound.insert(arg.name.clone(), default.clone());
                }
                None if arg.required => {
                    return Err(DispatchError::ArgumentError {
                        command: descriptor.name.clone(),
                        reason: format!("missing required argument '{}'", arg.name),
                    });
                }
                None => {}
            },
        }
    }

    for (key, value) in raw {
        if !declared.contains(&key.as_str()) {
            if descriptor.allows_catch_all {
                bound.insert(key.clone(), value.clone());
            } else {
                return Err(DispatchError::ArgumentError {
                    command: descriptor.name.clone(),
                    reason: format!("unexpected argument '{key}'"),
                });
            }
        }
    }

    Ok(bound)
}

fn check_type(
    descriptor: &CommandDescriptor,
    arg: &ArgumentDescriptor,
    value: &serde_json::Value,
) -> Result<(), DispatchError> {
    let matches = match arg.arg_type {
        ArgumentType::String => value.is_string(),
        ArgumentType::Number => value.is_number(),
        ArgumentType::Bool => value.is_boolean(),
        ArgumentType::Json => true,
    };
    if matches {
        Ok(())
    } else {
        Err(DispatchError::ArgumentError {
            command: descriptor.name.clone(),
            reason: format!("argument '{}' has the wrong type", arg.name),
        })
    }
}

/// Resolves a command name via an [`ExtensionRegistry`], enforces the
/// agent's per-command enable-list, binds arguments, and invokes the
/// owning extension (§4.2).
pub struct CommandDispatcher {
    registry: ExtensionRegistry,
}

impl CommandDispatcher {
    pub fn new(registry: ExtensionRegistry) -> Self {
        Self { registry }
    }

    /// All command descriptors across every registered extension, forwarded
    /// for `PromptAssembler`'s `{commands}` catalog injection (§4.4).
    pub async fn all_commands(&self) -> Vec<CommandDescriptor> {
        self.registry.all_commands().await
    }

    /// `GET /api/extensions` (§6): registered extension names.
    pub async fn list_extensions(&self) -> Vec<String> {
        self.registry.list_extensions().await
    }

    /// `GET /api/extensions/{cmd}/args` (§6): a single extension's commands.
    pub async fn extension_commands(&self, extension_name: &str) -> Option<Vec<CommandDescriptor>> {
        self.registry.commands(extension_name).await
    }

    /// `GET /api/extensions/.../settings` (§6): whether `extension_name` is
    /// a known extension, the narrow settings-presence check this registry
    /// currently tracks (see `ExtensionRegistry::settings_schema`).
    pub async fn extension_settings_known(&self, extension_name: &str) -> bool {
        self.registry.settings_schema(extension_name).await
    }

    /// Runs `command_name` with `raw_args` on behalf of `agent`, recording
    /// the outcome via `sink` exactly once whether it succeeds or fails
    /// (§4.2). Sandboxed commands are dispatched the same way as any
    /// other; the sandbox facility itself lives outside this crate (§1),
    /// so `sandboxed` is surfaced to callers via the resolved descriptor
    /// rather than enforced here.
    pub async fn dispatch(
        &self,
        agent: &AgentSnapshot,
        command_name: &str,
        raw_args: HashMap<String, serde_json::Value>,
        sink: &dyn DispatchSink,
    ) -> Result<serde_json::Value, DispatchError> {
        let args_for_log = serde_json::Value::Object(raw_args.clone().into_iter().collect());

        let result = self.dispatch_inner(agent, command_name, raw_args).await;

        match &result {
            Ok(value) => {
                sink.record_tool_call(command_name, &args_for_log, &value.to_string(), false)
                    .await;
            }
            Err(err) => {
                sink.record_tool_call(command_name, &args_for_log, &err.to_string(), true)
                    .await;
            }
        }

        result
    }

    async fn dispatch_inner(
        &self,
        agent: &AgentSnapshot,
        command_name: &str,
        raw_args: HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, DispatchError> {
        if !agent.is_command_enabled(command_name) {
            return Err(DispatchError::CommandDisabled(command_name.to_string()));
        }

        let (extension, descriptor) = self.registry.resolve(command_name).await?;
        let bound = bind_arguments(&descriptor, &raw_args)?;

        extension.execute(command_name, &bound).await
    }
}
