//! In-crate test fakes (§2 "fakes" ambient component).
//!
//! Grounded on `mcp_server.rs`'s `MockToolProtocol` test fixture: a minimal,
//! deterministic stand-in for each external capability trait, used across
//! this crate's unit and integration tests instead of re-deriving a fake in
//! every test module.

use crate::error::{DispatchError, ProviderError};
use crate::extension::{ArgumentDescriptor, ArgumentType, CommandDescriptor, Extension, ExtensionCategory};
use crate::memory::{MemoryStore, MemorySnippet};
use crate::provider::{InferenceOutput, InferenceRequest, Provider, Service};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A provider whose behavior is scripted by a queue of canned responses.
/// Each `inference` call pops the next scripted outcome; once exhausted it
/// returns the last outcome repeatedly, keeping tests that under-script
/// iterations from panicking.
pub struct FakeProvider {
    name: String,
    services: Vec<Service>,
    script: Mutex<Vec<FakeOutcome>>,
    pub call_count: AtomicUsize,
    pub failure_count: AtomicUsize,
    configured: bool,
}

#[derive(Clone)]
pub enum FakeOutcome {
    Text(String),
    Transient(String),
    Fatal(String),
}

impl FakeProvider {
    pub fn new(name: &str, services: Vec<Service>) -> Self {
        Self {
            name: name.to_string(),
            services,
            script: Mutex::new(vec![FakeOutcome::Text("ok".to_string())]),
            call_count: AtomicUsize::new(0),
            failure_count: AtomicUsize::new(0),
            configured: true,
        }
    }

    pub fn with_script(mut self, script: Vec<FakeOutcome>) -> Self {
        self.script = Mutex::new(script);
        self
    }

    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn services(&self) -> &[Service] {
        &self.services
    }

    fn max_tokens(&self) -> usize {
        8_000
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn inference(&self, _request: InferenceRequest) -> Result<InferenceOutput, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let outcome = if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        };
        match outcome {
            FakeOutcome::Text(text) => Ok(InferenceOutput::Text(text)),
            FakeOutcome::Transient(msg) => {
                self.failure_count.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Transient(msg))
            }
            FakeOutcome::Fatal(msg) => {
                self.failure_count.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Fatal(msg))
            }
        }
    }
}

/// An extension exposing a single `echo` command, used across dispatcher
/// and tool-loop tests (§8 scenario 4).
pub struct EchoExtension;

#[async_trait]
impl Extension for EchoExtension {
    fn name(&self) -> &str {
        "echo"
    }

    fn commands(&self) -> Vec<CommandDescriptor> {
        vec![CommandDescriptor {
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
        }]
    }

    async fn execute(
        &self,
        command_name: &str,
        args: &HashMap<String, serde_json::Value>,
    ) -> Result<serde_json::Value, DispatchError> {
        if command_name != "echo" {
            return Err(DispatchError::CommandUnknown(command_name.to_string()));
        }
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DispatchError::ArgumentError {
                command: "echo".to_string(),
                reason: "missing required argument 'text'".to_string(),
            })?;
        Ok(serde_json::Value::String(text.to_string()))
    }
}

/// A `MemoryStore` fake returning a fixed set of snippets for any query.
pub struct FakeMemoryStore {
    snippets: Vec<MemorySnippet>,
}

impl FakeMemoryStore {
    pub fn new(snippets: Vec<MemorySnippet>) -> Self {
        Self { snippets }
    }

    pub fn empty() -> Self {
        Self { snippets: vec![] }
    }
}

#[async_trait]
impl MemoryStore for FakeMemoryStore {
    async fn retrieve(
        &self,
        _query: &str,
        _collection_id: &str,
        k: usize,
    ) -> Result<Vec<MemorySnippet>, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.snippets.iter().take(k).cloned().collect())
    }
}
