//! `ExtensionRegistry` (§4.2 registry contract).
//!
//! Grounded on `tool_protocol.rs`'s `ToolRegistry` (single and multi-protocol
//! variants keyed by `tool_to_protocol: HashMap<String, String>`) and
//! `mcp_server.rs`'s `UnifiedMcpServer` (aggregates multiple tool protocols,
//! routes by name, "last registered wins" on name conflicts).

use crate::error::DispatchError;
use crate::extension::{CommandDescriptor, Extension};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Discovers extensions and resolves command names to their owning
/// extension (§4.2).
///
/// Thread-safe and cheaply cloneable (`Arc`-backed internals), so it can be
/// shared across concurrently running requests the same way
/// `UnifiedMcpServer` shares its `tools` map.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    extensions: Arc<RwLock<HashMap<String, Arc<dyn Extension>>>>,
    /// command name -> owning extension name. Last registration wins on
    /// conflict, mirroring `ToolRegistry::add_protocol`.
    command_to_extension: Arc<RwLock<HashMap<String, String>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `extension`, indexing all of its commands. A command name
    /// already owned by a previously registered extension is silently
    /// reassigned to this one ("last registered wins").
    pub async fn register(&self, extension: Arc<dyn Extension>) {
        let name = extension.name().to_string();
        let mut command_to_extension = self.command_to_extension.write().await;
        for descriptor in extension.commands() {
            command_to_extension.insert(descriptor.name.clone(), name.clone());
        }
        drop(command_to_extension);
        self.extensions.write().await.insert(name, extension);
    }

    /// `list_extensions() -> [name]`.
    pub async fn list_extensions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.extensions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// `commands(ext) -> [descriptor]`.
    pub async fn commands(&self, extension_name: &str) -> Option<Vec<CommandDescriptor>> {
        self.extensions
            .read()
            .await
            .get(extension_name)
            .map(|ext| ext.commands())
    }

    /// All command descriptors across every registered extension, used by
    /// `PromptAssembler`'s `{commands}` catalog injection (§4.4).
    pub async fn all_commands(&self) -> Vec<CommandDescriptor> {
        let extensions = self.extensions.read().await;
        let mut all = Vec::new();
        for ext in extensions.values() {
            all.extend(ext.commands());
        }
        all
    }

    /// `settings_schema(ext)` — placeholder hook kept for symmetry with
    /// `ProviderRegistry::settings_schema`; extensions in this crate do not
    /// yet declare a settings schema of their own beyond
    /// `requires_agent_settings` on each command descriptor.
    pub async fn settings_schema(&self, extension_name: &str) -> bool {
        self.extensions.read().await.contains_key(extension_name)
    }

    /// `resolve(command_name) -> (ext, descriptor, callable)`.
    ///
    /// Returns the owning extension and the matching descriptor; the
    /// "callable" part of the contract is `Extension::execute` itself,
    /// invoked by [`crate::dispatcher::CommandDispatcher`].
    pub async fn resolve(
        &self,
        command_name: &str,
    ) -> Result<(Arc<dyn Extension>, CommandDescriptor), DispatchError> {
        let command_to_extension = self.command_to_extension.read().await;
        let extension_name = command_to_extension
            .get(command_name)
            .ok_or_else(|| DispatchError::CommandUnknown(command_name.to_string()))?
            .clone();
        drop(command_to_extension);

        let extensions = self.extensions.read().await;
        let extension = extensions
            .get(&extension_name)
            .cloned()
            .ok_or_else(|| DispatchError::CommandUnknown(command_name.to_string()))?;
        drop(extensions);

        let descriptor = extension
            .commands()
            .into_iter()
            .find(|d| d.name == command_name)
            .ok_or_else(|| DispatchError::CommandUnknown(command_name.to_string()))?;

        Ok((extension, descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoExtension;

    #[tokio::test]
    async fn register_and_list() {
        let registry = ExtensionRegistry::new();
        registry.register(Arc::new(EchoExtension)).await;
        assert_eq!(registry.list_extensions().await, vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn resolve_known_and_unknown_command() {
        let registry = ExtensionRegistry::new();
        registry.register(Arc::new(EchoExtension)).await;

        let (ext, descriptor) = registry.resolve("echo").await.unwrap();
        assert_eq!(ext.name(), "echo");
        assert_eq!(descriptor.name, "echo");

        let err = registry.resolve("nonexistent").await.unwrap_err();
        assert!(matches!(err, DispatchError::CommandUnknown(_)));
    }

    #[tokio::test]
    async fn all_commands_aggregates_across_extensions() {
        let registry = ExtensionRegistry::new();
        registry.register(Arc::new(EchoExtension)).await;
        let all = registry.all_commands().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "echo");
    }
}
