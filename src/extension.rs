//! `Extension` / `Command` capability types (§3, §4.2).
//!
//! Generalizes `tool_protocol.rs`'s `ToolProtocol` trait (a single
//! `execute(tool_name, parameters) -> ToolResult` call plus `list_tools`)
//! into the spec's richer `Extension` shape: one extension exposes several
//! named commands, each with a typed argument list, a capability category,
//! and sandboxing/settings flags the dispatcher enforces (§4.2).
//!
//! Concrete extension implementations (web scrape, SQL, email, SSO) are
//! explicitly out of core scope (§1); this module only defines the
//! capability surface `ExtensionRegistry`/`CommandDispatcher` consume.

use crate::error::DispatchError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Coarse capability category a command's extension belongs to (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionCategory {
    AiProvider,
    Tool,
    Notifier,
    Other,
}

/// The accepted scalar shapes for a command argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentType {
    String,
    Number,
    Bool,
    Json,
}

/// Declares one named, typed argument a command accepts (§3).
#[derive(Debug, Clone)]
pub struct ArgumentDescriptor {
    pub name: String,
    pub arg_type: ArgumentType,
    /// Serialized default value used when the argument is omitted.
    pub default: Option<serde_json::Value>,
    pub required: bool,
}

/// Describes one command an extension exposes (§3, §4.2).
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    /// Name used to invoke the command (unique across the registry).
    pub name: String,
    /// Human-readable display name.
    pub display_name: String,
    pub arguments: Vec<ArgumentDescriptor>,
    pub category: ExtensionCategory,
    /// Whether this command needs agent-scoped settings (API keys, etc.)
    /// to run.
    pub requires_agent_settings: bool,
    /// Whether execution is routed through an external sandbox facility
    /// (§4.2 sandboxing policy).
    pub sandboxed: bool,
    /// Whether unexpected argument keys are forwarded as a catch-all
    /// rather than rejected (§4.2 argument binding).
    pub allows_catch_all: bool,
}

impl CommandDescriptor {
    /// One-line summary used by `PromptAssembler`'s `{commands}` catalog
    /// injection (§4.4): `name(arg1, arg2) — display name`.
    pub fn catalog_line(&self) -> String {
        let arg_names: Vec<&str> = self.arguments.iter().map(|a| a.name.as_str()).collect();
        format!("{}({}) — {}", self.name, arg_names.join(", "), self.display_name)
    }
}

/// A named group of commands (§3).
///
/// Implementations are expected to be stateless aside from whatever
/// internal clients they hold; `execute` receives already-bound arguments
/// (the dispatcher has already applied defaults and rejected unknown keys
/// per the descriptor) and returns a JSON-serializable result or a
/// [`DispatchError`].
#[async_trait]
pub trait Extension: Send + Sync {
    /// Stable extension name.
    fn name(&self) -> &str;

    /// Commands this extension exposes.
    fn commands(&self) -> Vec<CommandDescriptor>;

    /// Execute `command_name` with already-bound `args`.
    async fn execute(
        &self,
        command_name: &str,
        args: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_line_lists_argument_names() {
        let descriptor = CommandDescriptor {
            name: "echo".to_string(),
            display_name: "Echo".to_string(),
            arguments: vec![ArgumentDescriptor {
                name: "text".to_string(),
                arg_type: ArgumentType::String,
                default: None,
                required: true,
            }],
            category: ExtensionCategory::Tool,
            requires_agent_settings: false,
            sandboxed: false,
            allows_catch_all: false,
        };
        assert_eq!(descriptor.catalog_line(), "echo(text) — Echo");
    }
}
