//! Process configuration (§4.8).
//!
//! This struct is intentionally minimal and loaded directly from environment
//! variables — no TOML/YAML config-file parsing dependency is introduced,
//! following the same "users construct it however they want, no file-parsing
//! dependency" philosophy as the upstream `CloudLLMConfig`. Every field here
//! corresponds to one environment variable named in §6's "Environment
//! configuration" contract and expanded concretely in SPEC_FULL.md §4.8.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

/// Global runtime configuration, loaded once at process startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bearer token inbound requests must present (`AGENT_API_KEY`).
    pub agent_api_key: Option<String>,
    /// Filesystem root for conversation/chain/prompt persistence (`WORKING_DIRECTORY`).
    pub working_directory: PathBuf,
    /// `LOG_LEVEL`: one of `error|warn|info|debug|trace`.
    pub log_level: String,
    /// `LOG_FORMAT`: `pretty` or `json`. `env_logger` only natively supports
    /// the pretty/plain format; `json` is accepted and recorded for forward
    /// compatibility with a structured formatter, but falls back to the
    /// default format today.
    pub log_format: String,
    /// Bounded connection-pool sizing for `ConversationStore` (§5).
    pub conversation_pool_size: usize,
    pub conversation_pool_overflow: usize,
    pub conversation_pool_checkout_timeout: Duration,
    /// §5 cancellation deadlines.
    pub request_deadline: Duration,
    pub step_deadline: Duration,
    /// §5 concurrency ceiling for heavy (chain / autonomous-loop) tasks.
    pub max_concurrent_heavy_tasks: usize,
    /// §4.6/§8 tool-loop iteration cap.
    pub max_tool_loop_iterations: usize,
    /// §4.5/§8 chain recursion depth bound.
    pub max_chain_recursion_depth: u32,
    /// HTTP surface listen address, used only when the `server` feature is enabled.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            agent_api_key: None,
            working_directory: PathBuf::from("agent_data"),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            conversation_pool_size: 15,
            conversation_pool_overflow: 5,
            conversation_pool_checkout_timeout: Duration::from_secs(20),
            request_deadline: Duration::from_secs(900),
            step_deadline: Duration::from_secs(180),
            max_concurrent_heavy_tasks: 3,
            max_tool_loop_iterations: 5,
            max_chain_recursion_depth: 8,
            bind_addr: "127.0.0.1:8337".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables, falling back to
    /// [`ServerConfig::default`] for anything unset. Malformed numeric/
    /// duration values produce a [`ConfigError`] (exit code 1 per §6).
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            agent_api_key: std::env::var("AGENT_API_KEY").ok(),
            working_directory: std::env::var("WORKING_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or(defaults.working_directory),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: std::env::var("LOG_FORMAT").unwrap_or(defaults.log_format),
            conversation_pool_size: parse_env_or(
                "CONVERSATION_POOL_SIZE",
                defaults.conversation_pool_size,
            )?,
            conversation_pool_overflow: parse_env_or(
                "CONVERSATION_POOL_OVERFLOW",
                defaults.conversation_pool_overflow,
            )?,
            conversation_pool_checkout_timeout: Duration::from_secs(parse_env_or(
                "CONVERSATION_POOL_CHECKOUT_TIMEOUT_SECS",
                defaults.conversation_pool_checkout_timeout.as_secs(),
            )?),
            request_deadline: Duration::from_secs(parse_env_or(
                "REQUEST_DEADLINE_SECS",
                defaults.request_deadline.as_secs(),
            )?),
            step_deadline: Duration::from_secs(parse_env_or(
                "STEP_DEADLINE_SECS",
                defaults.step_deadline.as_secs(),
            )?),
            max_concurrent_heavy_tasks: parse_env_or(
                "MAX_CONCURRENT_HEAVY_TASKS",
                defaults.max_concurrent_heavy_tasks,
            )?,
            max_tool_loop_iterations: parse_env_or(
                "MAX_TOOL_LOOP_ITERATIONS",
                defaults.max_tool_loop_iterations,
            )?,
            max_chain_recursion_depth: parse_env_or(
                "MAX_CHAIN_RECURSION_DEPTH",
                defaults.max_chain_recursion_depth,
            )?,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.conversation_pool_size, 15);
        assert_eq!(cfg.conversation_pool_overflow, 5);
        assert_eq!(cfg.max_concurrent_heavy_tasks, 3);
        assert_eq!(cfg.max_tool_loop_iterations, 5);
        assert_eq!(cfg.max_chain_recursion_depth, 8);
        assert_eq!(cfg.request_deadline, Duration::from_secs(900));
        assert_eq!(cfg.step_deadline, Duration::from_secs(180));
    }

    #[test]
    fn parse_env_or_falls_back_when_unset() {
        std::env::remove_var("AGENTFORGE_TEST_UNSET_KEY");
        let v: usize = parse_env_or("AGENTFORGE_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn parse_env_or_rejects_malformed_values() {
        std::env::set_var("AGENTFORGE_TEST_BAD_NUMBER", "not-a-number");
        let result: Result<usize, ConfigError> = parse_env_or("AGENTFORGE_TEST_BAD_NUMBER", 1);
        assert!(result.is_err());
        std::env::remove_var("AGENTFORGE_TEST_BAD_NUMBER");
    }
}
