//! `Agent` and its immutable request-time `AgentSnapshot` (§3).
//!
//! Generalizes the `with_*` builder convention used throughout this
//! codebase (`agent.rs`'s `Agent`, `tool_protocol.rs`'s `ToolMetadata`) to
//! the spec's agent-settings map. An `Agent` is mutable via admin
//! operations; `AgentRuntime` takes an immutable [`AgentSnapshot`] at the
//! start of each request so in-flight requests are unaffected by
//! concurrent admin edits (§3 lifecycles).

use std::collections::{HashMap, HashSet};

/// A single agent setting value. Settings are a string→(string|number|bool)
/// map per §3; unknown keys are preserved and passed through to provider
/// adapters rather than rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl SettingValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(b) => Some(*b),
            SettingValue::Str(s) => match s.as_str() {
                "true" | "True" | "1" => Some(true),
                "false" | "False" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Num(n) => Some(*n),
            SettingValue::Str(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Str(s.to_string())
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        SettingValue::Bool(b)
    }
}

impl From<f64> for SettingValue {
    fn from(n: f64) -> Self {
        SettingValue::Num(n)
    }
}

/// Named configuration bundle a request executes under, identified by
/// `(tenant_id, agent_name)` (§3).
#[derive(Debug, Clone)]
pub struct Agent {
    pub tenant_id: String,
    pub agent_name: String,
    settings: HashMap<String, SettingValue>,
    enabled_commands: HashMap<String, bool>,
    pub persona: String,
    pub training_sources: Vec<String>,
}

impl Agent {
    pub fn new(tenant_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_name: agent_name.into(),
            settings: HashMap::new(),
            enabled_commands: HashMap::new(),
            persona: String::new(),
            training_sources: Vec::new(),
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    pub fn with_enabled_command(mut self, command_name: impl Into<String>, enabled: bool) -> Self {
        self.enabled_commands.insert(command_name.into(), enabled);
        self
    }

    /// Admin op: set or overwrite a setting in place.
    pub fn set_setting(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) {
        self.settings.insert(key.into(), value.into());
    }

    /// Admin op: enable/disable a command in place.
    pub fn set_command_enabled(&mut self, command_name: impl Into<String>, enabled: bool) {
        self.enabled_commands.insert(command_name.into(), enabled);
    }

    pub fn setting(&self, key: &str) -> Option<&SettingValue> {
        self.settings.get(key)
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    pub fn setting_bool(&self, key: &str, default: bool) -> bool {
        self.settings
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    pub fn setting_f64(&self, key: &str, default: f64) -> f64 {
        self.settings.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    /// A command is enabled only if explicitly marked `true` in the
    /// enabled-commands set; absence means disabled (§4.2 "not in agent's
    /// enabled set").
    pub fn is_command_enabled(&self, command_name: &str) -> bool {
        self.enabled_commands.get(command_name).copied().unwrap_or(false)
    }

    /// Takes an immutable snapshot for the lifetime of one request (§3
    /// lifecycles: "immutable snapshot taken at the start of each request").
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            tenant_id: self.tenant_id.clone(),
            agent_name: self.agent_name.clone(),
            settings: self.settings.clone(),
            enabled_commands: self.enabled_commands.clone(),
            persona: self.persona.clone(),
        }
    }
}

/// Immutable copy of an [`Agent`]'s settings taken at request entry (§3).
/// Concurrent admin edits to the live `Agent` never affect a request
/// already holding a snapshot.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub tenant_id: String,
    pub agent_name: String,
    settings: HashMap<String, SettingValue>,
    enabled_commands: HashMap<String, bool>,
    pub persona: String,
}

impl AgentSnapshot {
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    pub fn setting_bool(&self, key: &str, default: bool) -> bool {
        self.settings
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    pub fn setting_f64(&self, key: &str, default: f64) -> f64 {
        self.settings.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
    }

    pub fn is_command_enabled(&self, command_name: &str) -> bool {
        self.enabled_commands.get(command_name).copied().unwrap_or(false)
    }

    pub fn enabled_command_names(&self) -> HashSet<String> {
        self.enabled_commands
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// The preferred provider name for `service`, resolving via that
    /// service's settings key and falling back to `"default"` when unset
    /// or blank (§4.1 step 2).
    pub fn preferred_provider(&self, settings_key: &str) -> String {
        self.setting_str(settings_key)
            .filter(|s| !s.is_empty())
            .unwrap_or("default")
            .to_string()
    }

    /// All settings rendered as strings, for passing to
    /// `ProviderRegistry::instantiate`'s opaque `merged_settings` map.
    pub fn settings_as_strings(&self) -> HashMap<String, String> {
        self.settings
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    SettingValue::Str(s) => s.clone(),
                    SettingValue::Num(n) => n.to_string(),
                    SettingValue::Bool(b) => b.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }
}

/// Registered `Agent`s keyed by `(tenant_id, agent_name)`, the same
/// owned-registry shape as [`crate::chain::ChainStore`] and
/// [`crate::prompt::PromptTemplateStore`]: the HTTP surface (§4.12, §6)
/// looks an agent up by name, snapshots it, and hands the snapshot to
/// [`crate::agent_runtime::AgentRuntime`] — concrete agent persistence
/// (a database, a config file) is an application concern layered on top.
#[derive(Clone, Default)]
pub struct AgentStore {
    agents: std::sync::Arc<tokio::sync::RwLock<HashMap<(String, String), Agent>>>,
}

impl AgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant_id: &str, agent_name: &str) -> (String, String) {
        (tenant_id.to_string(), agent_name.to_string())
    }

    /// Admin op: create or overwrite an agent definition.
    pub async fn upsert(&self, agent: Agent) {
        let key = Self::key(&agent.tenant_id, &agent.agent_name);
        self.agents.write().await.insert(key, agent);
    }

    pub async fn get(&self, tenant_id: &str, agent_name: &str) -> Option<Agent> {
        self.agents.read().await.get(&Self::key(tenant_id, agent_name)).cloned()
    }

    pub async fn snapshot(&self, tenant_id: &str, agent_name: &str) -> Option<AgentSnapshot> {
        self.get(tenant_id, agent_name).await.map(|a| a.snapshot())
    }

    pub async fn delete(&self, tenant_id: &str, agent_name: &str) -> bool {
        self.agents.write().await.remove(&Self::key(tenant_id, agent_name)).is_some()
    }

    /// Names of every agent registered for `tenant_id`.
    pub async fn list(&self, tenant_id: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .agents
            .read()
            .await
            .keys()
            .filter(|(tenant, _)| tenant == tenant_id)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn agent_store_round_trips_and_lists_by_tenant() {
        let store = AgentStore::new();
        store.upsert(Agent::new("t1", "a1").with_persona("helpful")).await;
        store.upsert(Agent::new("t1", "a2")).await;
        store.upsert(Agent::new("t2", "a1")).await;

        assert_eq!(store.list("t1").await, vec!["a1".to_string(), "a2".to_string()]);
        let snapshot = store.snapshot("t1", "a1").await.unwrap();
        assert_eq!(snapshot.persona, "helpful");

        assert!(store.delete("t1", "a1").await);
        assert!(store.get("t1", "a1").await.is_none());
        assert!(!store.delete("t1", "a1").await);
    }

    #[test]
    fn unset_command_defaults_to_disabled() {
        let agent = Agent::new("t1", "a1");
        assert!(!agent.is_command_enabled("echo"));
    }

    #[test]
    fn snapshot_is_independent_of_later_edits() {
        let mut agent = Agent::new("t1", "a1").with_enabled_command("echo", true);
        let snapshot = agent.snapshot();
        agent.set_command_enabled("echo", false);

        assert!(snapshot.is_command_enabled("echo"));
        assert!(!agent.is_command_enabled("echo"));
    }

    #[test]
    fn preferred_provider_falls_back_to_default() {
        let agent = Agent::new("t1", "a1");
        let snapshot = agent.snapshot();
        assert_eq!(snapshot.preferred_provider("provider"), "default");

        let agent = Agent::new("t1", "a1").with_setting("provider", "P1");
        assert_eq!(agent.snapshot().preferred_provider("provider"), "P1");
    }

    #[test]
    fn setting_bool_parses_string_booleans() {
        let agent = Agent::new("t1", "a1").with_setting("AUTONOMOUS_EXECUTION", "true");
        assert!(agent.setting_bool("AUTONOMOUS_EXECUTION", false));
    }
}
