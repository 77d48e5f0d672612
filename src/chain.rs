//! `ChainEngine`, `Chain`, `Step`, `ChainState` (§3, §4.5).
//!
//! Grounded on `original_source/src/agixt/Chain.py`'s `Step`/`Chain` JSON
//! shape (`step`, `agent_name`, `prompt_type`, `prompt`) and its
//! `run_chain` loop (materialize step args, dispatch by `prompt_type`,
//! record output, advance), with `orchestration.rs`'s state-enum/builder
//! idiom for the run's lifecycle.
//!
//! `ChainEngine` depends on prompt execution and command dispatch only
//! through narrow traits/owned values (`PromptRunner`, `CommandDispatcher`)
//! rather than on `AgentRuntime` directly, since `AgentRuntime` in turn
//! delegates `mode = chain` requests back into `ChainEngine` (§4.6) — the
//! two modules would otherwise form a dependency cycle.

use crate::agent::AgentSnapshot;
use crate::dispatcher::{CommandDispatcher, DispatchSink};
use crate::error::ChainError;
use crate::event::{ChainEvent, EventHandler};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The kind of target a step dispatches to (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptType {
    Prompt,
    Command,
    Chain,
}

/// One step in a [`Chain`] (§3). `agent_name` empty means "inherit the
/// chain's default agent for this run".
#[derive(Debug, Clone)]
pub struct Step {
    pub step_number: u32,
    pub agent_name: String,
    pub prompt_type: PromptType,
    pub prompt: HashMap<String, serde_json::Value>,
}

/// A named, ordered sequence of steps (§3).
#[derive(Debug, Clone)]
pub struct Chain {
    pub name: String,
    pub steps: Vec<Step>,
}

/// Registered chain definitions, keyed by name. Concrete chain authoring
/// lives outside this crate; this store only holds what `ChainEngine`
/// needs to look a chain up by name for nested (`prompt_type = chain`)
/// runs.
#[derive(Clone, Default)]
pub struct ChainStore {
    chains: Arc<RwLock<HashMap<String, Chain>>>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `chain`, rejecting a definition with duplicate
    /// `step_number`s (§4.5: "an authoring error rejected at load").
    pub async fn register(&self, chain: Chain) -> Result<(), ChainError> {
        let mut seen = std::collections::HashSet::new();
        for step in &chain.steps {
            if !seen.insert(step.step_number) {
                return Err(ChainError::DuplicateStepNumber(step.step_number));
            }
        }
        self.chains.write().await.insert(chain.name.clone(), chain);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Chain> {
        self.chains.read().await.get(name).cloned()
    }
}

/// The lifecycle state of one chain run (§4.5). `step_i` is the currently
/// active or last-attempted step number.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainState {
    Pending,
    Running { step: u32 },
    AwaitingOutput { step: u32 },
    Done,
    Failed { step: u32, cause: String },
    Cancelled,
}

impl ChainState {
    fn label(&self) -> &'static str {
        match self {
            ChainState::Pending => "Pending",
            ChainState::Running { .. } => "Running",
            ChainState::AwaitingOutput { .. } => "AwaitingOutput",
            ChainState::Done => "Done",
            ChainState::Failed { .. } => "Failed",
            ChainState::Cancelled => "Cancelled",
        }
    }
}

/// The result of running a chain to completion (or failure/cancellation).
#[derive(Debug, Clone)]
pub struct ChainRunResult {
    pub terminal_state: ChainState,
    /// `step_number -> result string`, the transient `StepOutput` map (§3).
    pub step_outputs: HashMap<u32, String>,
    /// The last successfully produced step output, or empty if none ran.
    pub final_output: String,
}

/// Narrow capability `ChainEngine` uses to run a `prompt_type = prompt`
/// step without depending on `AgentRuntime` directly (§4.6 mode=prompt).
/// `overrides` carries the caller-supplied per-run substitution overrides
/// (§6 "optional per-step overrides") down into `PromptInputs.overrides`.
#[async_trait]
pub trait PromptRunner: Send + Sync {
    async fn run_prompt(
        &self,
        tenant_id: &str,
        agent_name: &str,
        user_input: &str,
        overrides: &HashMap<String, String>,
    ) -> Result<String, ChainError>;
}

fn string_arg(args: &HashMap<String, serde_json::Value>, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

/// Substitutes `{user_input}`, `{STEPk_OUTPUT}`, and `{agent_name}` tokens
/// inside string-valued arguments (§4.5 step resolution #1). Non-string
/// values pass through unchanged.
fn materialize(
    prompt: &HashMap<String, serde_json::Value>,
    user_input: &str,
    step_outputs: &HashMap<u32, String>,
    effective_agent: &str,
) -> HashMap<String, serde_json::Value> {
    prompt
        .iter()
        .map(|(key, value)| {
            let materialized = match value.as_str() {
                Some(text) => {
                    let mut resolved = text.replace("{user_input}", user_input).replace("{agent_name}", effective_agent);
                    for (step_number, output) in step_outputs {
                        resolved = resolved.replace(&format!("{{STEP{step_number}_OUTPUT}}"), output);
                    }
                    serde_json::Value::String(resolved)
                }
                None => value.clone(),
            };
            (key.clone(), materialized)
        })
        .collect()
}

/// Runs chain definitions to completion, following the state machine in
/// §4.5 (`Pending → Running(step_i) → AwaitingOutput(step_i) → … → Done |
/// Failed(step_i, cause) | Cancelled`).
pub struct ChainEngine {
    chains: ChainStore,
    prompt_runner: Arc<dyn PromptRunner>,
    dispatcher: Arc<CommandDispatcher>,
    events: Arc<dyn EventHandler>,
    max_recursion_depth: u32,
}

impl ChainEngine {
    pub fn new(
        chains: ChainStore,
        prompt_runner: Arc<dyn PromptRunner>,
        dispatcher: Arc<CommandDispatcher>,
        events: Arc<dyn EventHandler>,
        max_recursion_depth: u32,
    ) -> Self {
        Self {
            chains,
            prompt_runner,
            dispatcher,
            events,
            max_recursion_depth,
        }
    }

    /// Runs `chain_name` with `user_input` as the top-level input (§4.5,
    /// §4.6 mode=chain). `depth` counts nested (`prompt_type = chain`)
    /// invocations and is rejected once it reaches `max_recursion_depth`
    /// (default 8), before the nested run starts. `overrides` is the
    /// caller-supplied per-run substitution map (§6), applied to every
    /// `prompt_type = prompt` step and propagated into nested chain runs.
    pub async fn run(
        &self,
        chain_name: &str,
        user_input: &str,
        agent: &AgentSnapshot,
        dispatch_sink: &dyn DispatchSink,
        depth: u32,
        overrides: &HashMap<String, String>,
    ) -> Result<ChainRunResult, ChainError> {
        if depth >= self.max_recursion_depth {
            return Err(ChainError::RecursionLimitExceeded { limit: self.max_recursion_depth });
        }

        let chain = self
            .chains
            .get(chain_name)
            .await
            .ok_or_else(|| ChainError::StepFailed {
                step: 0,
                cause: format!("unknown chain: {chain_name}"),
            })?;

        let run_id = format!("{chain_name}-{depth}-{}", chain.steps.len());
        self.events
            .on_chain_event(&ChainEvent::ChainStarted {
                chain_name: chain_name.to_string(),
                run_id: run_id.clone(),
                step_count: chain.steps.len(),
            })
            .await;

        let mut ordered = chain.steps.clone();
        ordered.sort_by_key(|s| s.step_number);

        let mut step_outputs: HashMap<u32, String> = HashMap::new();
        let mut final_output = String::new();
        let mut terminal = ChainState::Pending;

        for step in &ordered {
            terminal = ChainState::Running { step: step.step_number };

            let effective_agent = if step.agent_name.is_empty() {
                agent.agent_name.clone()
            } else {
                step.agent_name.clone()
            };
            let args = materialize(&step.prompt, user_input, &step_outputs, &effective_agent);

            self.events
                .on_chain_event(&ChainEvent::StepStarted {
                    chain_name: chain_name.to_string(),
                    run_id: run_id.clone(),
                    step_number: step.step_number,
                    prompt_type: format!("{:?}", step.prompt_type),
                })
                .await;

            terminal = ChainState::AwaitingOutput { step: step.step_number };
            let outcome = self.run_step(step, &args, &effective_agent, agent, dispatch_sink, depth, overrides).await;

            match outcome {
                Ok(output) => {
                    self.events
                        .on_chain_event(&ChainEvent::StepCompleted {
                            chain_name: chain_name.to_string(),
                            run_id: run_id.clone(),
                            step_number: step.step_number,
                            success: true,
                            error: None,
                        })
                        .await;
                    step_outputs.insert(step.step_number, output.clone());
                    final_output = output;
                }
                Err(err) => {
                    self.events
                        .on_chain_event(&ChainEvent::StepCompleted {
                            chain_name: chain_name.to_string(),
                            run_id: run_id.clone(),
                            step_number: step.step_number,
                            success: false,
                            error: Some(err.to_string()),
                        })
                        .await;
                    terminal = ChainState::Failed {
                        step: step.step_number,
                        cause: err.to_string(),
                    };
                    self.events
                        .on_chain_event(&ChainEvent::ChainCompleted {
                            chain_name: chain_name.to_string(),
                            run_id: run_id.clone(),
                            terminal_state: terminal.label().to_string(),
                        })
                        .await;
                    return Ok(ChainRunResult {
                        terminal_state: terminal,
                        step_outputs,
                        final_output,
                    });
                }
            }
        }

        terminal = ChainState::Done;
        self.events
            .on_chain_event(&ChainEvent::ChainCompleted {
                chain_name: chain_name.to_string(),
                run_id: run_id.clone(),
                terminal_state: terminal.label().to_string(),
            })
            .await;

        Ok(ChainRunResult {
            terminal_state: terminal,
            step_outputs,
            final_output,
        })
    }

    async fn run_step(
        &self,
        step: &Step,
        args: &HashMap<String, serde_json::Value>,
        effective_agent: &str,
        agent: &AgentSnapshot,
        dispatch_sink: &dyn DispatchSink,
        depth: u32,
        overrides: &HashMap<String, String>,
    ) -> Result<String, ChainError> {
        match step.prompt_type {
            PromptType::Prompt => {
                let user_input = string_arg(args, "user_input").unwrap_or_default();
                self.prompt_runner
                    .run_prompt(&agent.tenant_id, effective_agent, &user_input, overrides)
                    .await
                    .map_err(|e| promote(e, step.step_number))
            }
            PromptType::Command => {
                let command_name = string_arg(args, "command_name").ok_or_else(|| ChainError::StepFailed {
                    step: step.step_number,
                    cause: "command step missing 'command_name'".to_string(),
                })?;
                let mut command_args = args.clone();
                command_args.remove("command_name");
                let result = self
                    .dispatcher
                    .dispatch(agent, &command_name, command_args, dispatch_sink)
                    .await
                    .map_err(|e| ChainError::StepFailed {
                        step: step.step_number,
                        cause: e.to_string(),
                    })?;
                Ok(result.to_string())
            }
            PromptType::Chain => {
                let nested_name = string_arg(args, "chain_name").ok_or_else(|| ChainError::StepFailed {
                    step: step.step_number,
                    cause: "chain step missing 'chain_name'".to_string(),
                })?;
                let nested_input = string_arg(args, "user_input").unwrap_or_default();
                let result = Box::pin(self.run(&nested_name, &nested_input, agent, dispatch_sink, depth + 1, overrides)).await?;
                match result.terminal_state {
                    ChainState::Done => Ok(result.final_output),
                    other => Err(ChainError::StepFailed {
                        step: step.step_number,
                        cause: format!("nested chain '{nested_name}' ended in {other:?}"),
                    }),
                }
            }
        }
    }
}

fn promote(err: ChainError, step: u32) -> ChainError {
    match err {
        ChainError::StepFailed { step: 0, cause } => ChainError::StepFailed { step, cause },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::extension_registry::ExtensionRegistry;
    use crate::testing::EchoExtension;

    struct EchoingPromptRunner;

    #[async_trait]
    impl PromptRunner for EchoingPromptRunner {
        async fn run_prompt(
            &self,
            _tenant_id: &str,
            agent_name: &str,
            user_input: &str,
            _overrides: &HashMap<String, String>,
        ) -> Result<String, ChainError> {
            Ok(format!("{agent_name} says: {user_input}"))
        }
    }

    struct FailingPromptRunner;

    #[async_trait]
    impl PromptRunner for FailingPromptRunner {
        async fn run_prompt(
            &self,
            _tenant_id: &str,
            _agent_name: &str,
            _user_input: &str,
            _overrides: &HashMap<String, String>,
        ) -> Result<String, ChainError> {
            Err(ChainError::StepFailed { step: 0, cause: "boom".to_string() })
        }
    }

    fn prompt_step(n: u32, user_input: &str) -> Step {
        let mut prompt = HashMap::new();
        prompt.insert("user_input".to_string(), serde_json::Value::String(user_input.to_string()));
        Step {
            step_number: n,
            agent_name: String::new(),
            prompt_type: PromptType::Prompt,
            prompt,
        }
    }

    async fn dispatcher_with_echo() -> Arc<CommandDispatcher> {
        let registry = ExtensionRegistry::new();
        registry.register(Arc::new(EchoExtension)).await;
        Arc::new(CommandDispatcher::new(registry))
    }

    #[tokio::test]
    async fn two_step_chain_threads_step_output_into_the_next_step() {
        let chains = ChainStore::new();
        let mut step2 = prompt_step(2, "follow-up: {STEP1_OUTPUT}");
        step2.prompt.insert("extra".to_string(), serde_json::Value::Bool(true));
        chains
            .register(Chain {
                name: "greet".to_string(),
                steps: vec![prompt_step(1, "hello"), step2],
            })
            .await
            .unwrap();

        let engine = ChainEngine::new(
            chains,
            Arc::new(EchoingPromptRunner),
            dispatcher_with_echo().await,
            Arc::new(crate::event::NullEventHandler),
            8,
        );
        let agent = Agent::new("t1", "a1").snapshot();

        let result = engine
            .run("greet", "hi", &agent, &crate::dispatcher::NullDispatchSink, 0, &HashMap::new())
            .await
            .unwrap();

        assert_eq!(result.terminal_state, ChainState::Done);
        assert_eq!(result.step_outputs[&1], "a1 says: hello");
        assert!(result.final_output.contains("a1 says: hello"));
    }

    #[tokio::test]
    async fn step_failure_halts_the_chain() {
        let chains = ChainStore::new();
        chains
            .register(Chain {
                name: "broken".to_string(),
                steps: vec![prompt_step(1, "hi"), prompt_step(2, "unreached")],
            })
            .await
            .unwrap();

        let engine = ChainEngine::new(
            chains,
            Arc::new(FailingPromptRunner),
            dispatcher_with_echo().await,
            Arc::new(crate::event::NullEventHandler),
            8,
        );
        let agent = Agent::new("t1", "a1").snapshot();

        let result = engine
            .run("broken", "hi", &agent, &crate::dispatcher::NullDispatchSink, 0, &HashMap::new())
            .await
            .unwrap();

        assert!(matches!(result.terminal_state, ChainState::Failed { step: 1, .. }));
        assert!(result.step_outputs.is_empty());
    }

    #[tokio::test]
    async fn duplicate_step_numbers_are_rejected_at_registration() {
        let chains = ChainStore::new();
        let err = chains
            .register(Chain {
                name: "dup".to_string(),
                steps: vec![prompt_step(1, "a"), prompt_step(1, "b")],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::DuplicateStepNumber(1)));
    }

    #[tokio::test]
    async fn recursion_limit_is_enforced_before_the_nested_run_starts() {
        let chains = ChainStore::new();
        chains
            .register(Chain {
                name: "self_loop".to_string(),
                steps: vec![prompt_step(1, "x")],
            })
            .await
            .unwrap();

        let engine = ChainEngine::new(
            chains,
            Arc::new(EchoingPromptRunner),
            dispatcher_with_echo().await,
            Arc::new(crate::event::NullEventHandler),
            2,
        );
        let agent = Agent::new("t1", "a1").snapshot();

        let err = engine
            .run("self_loop", "hi", &agent, &crate::dispatcher::NullDispatchSink, 2, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::RecursionLimitExceeded { limit: 2 }));
    }
}
