//! `AgentRuntime` (§4.6): the end-to-end per-request orchestrator.
//!
//! Grounded on `agent.rs::Agent::send`'s tool loop (iteration cap, scan
//! accumulated text for a tool-call fragment, dispatch, append the result,
//! loop) and its brace-counted `parse_tool_call`, generalized to this
//! crate's fenced-JSON sentinel grammar (§4.4 Glossary: "Tool-call
//! sentinel") and `RequestEvent` emission in place of `AgentEvent`.
//!
//! `ChainEngine` needs a [`PromptRunner`](crate::chain::PromptRunner) to
//! run `prompt_type = prompt` steps, which `AgentRuntime` itself provides —
//! but `AgentRuntime` also needs a constructed `ChainEngine` to serve
//! `mode = chain` requests (§4.6). `Arc::new_cyclic` breaks that cycle: the
//! `ChainEngine` is built with a weak handle back to the `AgentRuntime`
//! that is still being constructed.

use crate::agent::{AgentSnapshot, AgentStore};
use crate::chain::{ChainEngine, ChainState, PromptRunner};
use crate::conversation::ConversationStore;
use crate::dispatcher::{CommandDispatcher, DispatchSink};
use crate::error::ChainError;
use crate::event::{EventHandler, RequestEvent};
use crate::memory::MemoryStore;
use crate::prompt::{PromptAssembler, PromptInputs, PromptTemplateStore};
use crate::provider::{InferenceOutput, InferenceRequest, Service};
use crate::provider_router::ProviderRouter;
use crate::streaming::{StreamFrame, StreamingBridge};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedSender;

/// Default template used when no `(prompt_category, prompt_name)` template
/// is registered for the agent's settings.
const FALLBACK_TEMPLATE: &str = "{persona}\n\n{context}\n\nAvailable commands:\n{commands}\n\n{conversation}\nUser: {user_input}\nAssistant:";

/// One chat-turn request (§4.6 mode=prompt inputs).
pub struct HandleRequest {
    pub agent: AgentSnapshot,
    pub conversation_name: String,
    pub user_input: String,
    pub stream: bool,
    /// When false, the final assistant turn is not appended to the
    /// conversation log (§4.6 step 7: "unless `log_output=false`").
    pub log_output: bool,
    pub stream_sink: Option<UnboundedSender<StreamFrame>>,
    /// Caller-supplied per-run substitution overrides (§6 "optional
    /// per-step overrides"), merged last-wins into `PromptInputs.overrides`.
    pub overrides: HashMap<String, String>,
}

/// The outcome of one `AgentRuntime::handle` call.
pub struct HandleResponse {
    pub text: String,
    pub tool_calls_made: usize,
}

/// Wires together every component named in §4.6's control-flow diagram:
/// `PromptAssembler.build → ProviderRouter.pick → Provider.inference →
/// StreamingBridge → (optional) parse tool-call JSON → CommandDispatcher.run
/// → loop → ConversationStore.append`.
pub struct AgentRuntime {
    provider_router: ProviderRouter,
    dispatcher: Arc<CommandDispatcher>,
    conversation: ConversationStore,
    templates: PromptTemplateStore,
    memory_store: Option<Arc<dyn MemoryStore>>,
    events: Arc<dyn EventHandler>,
    chain_engine: ChainEngine,
    max_tool_loop_iterations: usize,
    agents: AgentStore,
}

impl AgentRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider_router: ProviderRouter,
        dispatcher: Arc<CommandDispatcher>,
        conversation: ConversationStore,
        templates: PromptTemplateStore,
        memory_store: Option<Arc<dyn MemoryStore>>,
        events: Arc<dyn EventHandler>,
        chains: crate::chain::ChainStore,
        max_tool_loop_iterations: usize,
        max_chain_recursion_depth: u32,
        agents: AgentStore,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let prompt_runner: Arc<dyn PromptRunner> = Arc::new(WeakPromptRunner(weak.clone()));
            let chain_engine = ChainEngine::new(
                chains,
                prompt_runner,
                dispatcher.clone(),
                events.clone(),
                max_chain_recursion_depth,
            );
            Self {
                provider_router,
                dispatcher,
                conversation,
                templates,
                memory_store,
                events,
                chain_engine,
                max_tool_loop_iterations,
                agents,
            }
        })
    }

    /// Entry point: dispatches by the agent's `mode` setting (§4.6).
    pub async fn handle(&self, request: HandleRequest) -> Result<HandleResponse, ChainError> {
        self.events
            .on_request_event(&RequestEvent::RequestStarted {
                tenant_id: request.agent.tenant_id.clone(),
                agent_name: request.agent.agent_name.clone(),
                message_preview: request.user_input.chars().take(120).collect(),
            })
            .await;

        let result = match request.agent.setting_str("mode") {
            Some("chain") => self.handle_chain(&request).await,
            Some("command") => self.handle_command(&request).await,
            _ => self.handle_prompt(&request).await,
        };

        self.events
            .on_request_event(&RequestEvent::RequestCompleted {
                tenant_id: request.agent.tenant_id.clone(),
                agent_name: request.agent.agent_name.clone(),
                tokens_used: None,
                tool_calls_made: result.as_ref().map(|r| r.tool_calls_made).unwrap_or(0),
                response_length: result.as_ref().map(|r| r.text.len()).unwrap_or(0),
            })
            .await;

        result
    }

    async fn handle_chain(&self, request: &HandleRequest) -> Result<HandleResponse, ChainError> {
        let chain_name = request
            .agent
            .setting_str("prompt_name")
            .unwrap_or(&request.conversation_name)
            .to_string();
        let sink = ConversationDispatchSink {
            conversation: self.conversation.clone(),
            agent: request.agent.clone(),
            conversation_name: request.conversation_name.clone(),
            events: self.events.clone(),
        };

        // §8: "the number of interactions appended equals (user_input? 1 : 0)
        // + Σ_step(...) + (final_output? 1 : 0)" — a chain run is itself a
        // turn in `request.conversation_name`, not just a sequence of steps
        // recorded under the dispatch sink's scope.
        if !request.user_input.is_empty() {
            self.conversation
                .append(&request.agent.tenant_id, &request.agent.agent_name, &request.conversation_name, "user", &request.user_input, false)
                .await
                .map_err(|e| ChainError::StepFailed { step: 0, cause: e.to_string() })?;
        }

        let result = self
            .chain_engine
            .run(&chain_name, &request.user_input, &request.agent, &sink, 0, &request.overrides)
            .await?;

        if !matches!(result.terminal_state, ChainState::Done) {
            let error = match result.terminal_state {
                ChainState::Failed { step, cause } => ChainError::StepFailed { step, cause },
                ChainState::Cancelled => ChainError::Cancelled,
                _ => ChainError::StepFailed { step: 0, cause: "chain did not complete".to_string() },
            };
            let message = error.to_string();
            self.conversation
                .append(&request.agent.tenant_id, &request.agent.agent_name, &request.conversation_name, "assistant", &message, true)
                .await
                .map_err(|e| ChainError::StepFailed { step: 0, cause: e.to_string() })?;
            return Err(error);
        }

        if !result.final_output.is_empty() {
            self.conversation
                .append(&request.agent.tenant_id, &request.agent.agent_name, &request.conversation_name, "assistant", &result.final_output, false)
                .await
                .map_err(|e| ChainError::StepFailed { step: 0, cause: e.to_string() })?;
        }

        Ok(HandleResponse { text: result.final_output, tool_calls_made: 0 })
    }

    async fn handle_command(&self, request: &HandleRequest) -> Result<HandleResponse, ChainError> {
        let command_name = request
            .agent
            .setting_str("prompt_name")
            .ok_or_else(|| ChainError::StepFailed { step: 0, cause: "mode=command requires 'prompt_name'".to_string() })?
            .to_string();

        let args: HashMap<String, serde_json::Value> = serde_json::from_str(&request.user_input).unwrap_or_default();
        let sink = ConversationDispatchSink {
            conversation: self.conversation.clone(),
            agent: request.agent.clone(),
            conversation_name: request.conversation_name.clone(),
            events: self.events.clone(),
        };

        let result = self
            .dispatcher
            .dispatch(&request.agent, &command_name, args, &sink)
            .await
            .map_err(|e| ChainError::StepFailed { step: 0, cause: e.to_string() })?;

        Ok(HandleResponse { text: result.to_string(), tool_calls_made: 1 })
    }

    async fn handle_prompt(&self, request: &HandleRequest) -> Result<HandleResponse, ChainError> {
        self.run_prompt_loop(
            &request.agent,
            &request.conversation_name,
            &request.user_input,
            request.stream,
            &request.stream_sink,
            request.log_output,
            &request.overrides,
        )
        .await
        .map(|(text, tool_calls_made)| HandleResponse { text, tool_calls_made })
    }

    /// The actual tool loop (§4.6 mode=prompt steps 1-7), shared by
    /// `handle_prompt` and by `WeakPromptRunner` (so `prompt_type = prompt`
    /// chain steps get full tool-loop behavior too, not a stripped-down
    /// copy).
    async fn run_prompt_loop(
        &self,
        agent: &AgentSnapshot,
        conversation_name: &str,
        user_input: &str,
        stream: bool,
        stream_sink: &Option<UnboundedSender<StreamFrame>>,
        log_output: bool,
        overrides: &HashMap<String, String>,
    ) -> Result<(String, usize), ChainError> {
        self.conversation
            .append(&agent.tenant_id, &agent.agent_name, conversation_name, "user", user_input, false)
            .await
            .map_err(|e| ChainError::StepFailed { step: 0, cause: e.to_string() })?;

        let template = match (agent.setting_str("prompt_category"), agent.setting_str("prompt_name")) {
            (Some(category), Some(name)) => self.templates.get(category, name).await.unwrap_or_else(|| FALLBACK_TEMPLATE.to_string()),
            _ => FALLBACK_TEMPLATE.to_string(),
        };

        // §4.4/§4.6 step 2: retrieve memory when `websearch` is set OR the
        // template actually binds a `{context}` placeholder — gating solely
        // on `websearch` would make a template's `{context}` slot always
        // resolve empty.
        let should_retrieve_memory = agent.setting_bool("websearch", false) || template.contains("{context}");
        let memory_snippets = if should_retrieve_memory {
            match &self.memory_store {
                Some(store) => store
                    .retrieve(user_input, conversation_name, 5)
                    .await
                    .unwrap_or_default(),
                None => vec![],
            }
        } else {
            vec![]
        };

        let recent = self
            .conversation
            .list(&agent.tenant_id, &agent.agent_name, conversation_name, 10, 0)
            .await
            .map_err(|e| ChainError::StepFailed { step: 0, cause: e.to_string() })?
            .into_iter()
            .map(|i| format!("{}: {}", i.role, i.message))
            .collect::<Vec<_>>();

        let autonomous = agent.setting_bool("AUTONOMOUS_EXECUTION", false);
        let merged_settings = agent.settings_as_strings();
        let model = agent.setting_str("AI_MODEL").map(str::to_string);

        let mut accumulated = String::new();
        let mut iteration = 0usize;
        let mut tool_calls_made = 0usize;
        let mut last_input = user_input.to_string();
        let mut already_streamed = false;

        loop {
            iteration += 1;
            self.events
                .on_request_event(&RequestEvent::LLMCallStarted {
                    tenant_id: agent.tenant_id.clone(),
                    agent_name: agent.agent_name.clone(),
                    iteration,
                })
                .await;

            let commands = self.dispatcher_commands(agent).await;
            let inputs = PromptInputs {
                template: &template,
                user_input: &last_input,
                persona: &agent.persona,
                recent_turns: &recent,
                memory_snippets: &memory_snippets,
                commands: &commands,
                overrides,
            };
            let (prompt, input_tokens) = PromptAssembler::build(&inputs);

            // Only the final turn streams (§9 resolved Open Question): while
            // the tool loop can still continue, every call is buffered so its
            // text can be scanned for a tool-call sentinel.
            let can_stream_this_call = stream && !autonomous;
            let inference_request = InferenceRequest {
                prompt,
                input_tokens,
                images: vec![],
                stream: can_stream_this_call,
                use_smartest: false,
                model: model.clone(),
            };

            let output = self
                .provider_router
                .route(agent, Service::Llm, &merged_settings, &inference_request, self.events.as_ref())
                .await?;

            let text = match output {
                InferenceOutput::Text(text) => text,
                InferenceOutput::Stream(provider_stream) => {
                    if let Some(sink) = stream_sink {
                        already_streamed = true;
                        StreamingBridge::spawn(provider_stream, sink.clone(), tokio_util::sync::CancellationToken::new())
                            .await
                            .map_err(|_| ChainError::StepFailed { step: 0, cause: "streaming task panicked".to_string() })?
                            .full_text
                    } else {
                        buffer_stream(provider_stream).await?
                    }
                }
            };

            self.events
                .on_request_event(&RequestEvent::LLMCallCompleted {
                    tenant_id: agent.tenant_id.clone(),
                    agent_name: agent.agent_name.clone(),
                    iteration,
                    tokens_used: None,
                    response_length: text.len(),
                })
                .await;

            accumulated = text;

            if !autonomous {
                break;
            }

            match parse_tool_call(&accumulated) {
                Some((command_name, args)) => {
                    if iteration > self.max_tool_loop_iterations {
                        self.events
                            .on_request_event(&RequestEvent::ToolMaxIterationsReached {
                                tenant_id: agent.tenant_id.clone(),
                                agent_name: agent.agent_name.clone(),
                                max_iterations: self.max_tool_loop_iterations,
                            })
                            .await;
                        accumulated = format!("{accumulated}\n\n[Warning: maximum tool iterations reached]");
                        break;
                    }

                    self.events
                        .on_request_event(&RequestEvent::ToolCallDetected {
                            tenant_id: agent.tenant_id.clone(),
                            agent_name: agent.agent_name.clone(),
                            command_name: command_name.clone(),
                            args: serde_json::Value::Object(args.clone().into_iter().collect()),
                            iteration,
                        })
                        .await;

                    let sink = ConversationDispatchSink {
                        conversation: self.conversation.clone(),
                        agent: agent.clone(),
                        conversation_name: conversation_name.to_string(),
                        events: self.events.clone(),
                    };
                    let dispatch_result = self.dispatcher.dispatch(agent, &command_name, args, &sink).await;
                    tool_calls_made += 1;

                    let (tool_text, success, error) = match &dispatch_result {
                        Ok(value) => (value.to_string(), true, None),
                        Err(e) => (e.to_string(), false, Some(e.to_string())),
                    };

                    self.events
                        .on_request_event(&RequestEvent::ToolExecutionCompleted {
                            tenant_id: agent.tenant_id.clone(),
                            agent_name: agent.agent_name.clone(),
                            command_name,
                            success,
                            error,
                            iteration,
                        })
                        .await;

                    last_input = format!("Tool result: {tool_text}");
                }
                None => break,
            }
        }

        if log_output {
            self.conversation
                .append(&agent.tenant_id, &agent.agent_name, conversation_name, "assistant", &accumulated, false)
                .await
                .map_err(|e| ChainError::StepFailed { step: 0, cause: e.to_string() })?;
        }

        // The non-autonomous path streamed inline above if the provider
        // actually returned a Stream; a provider that ignored the `stream`
        // flag and returned Text still owes the caller a frame. The
        // autonomous (tool-loop) path never streams inline (every call is
        // buffered so it can be scanned for a tool-call sentinel), so its
        // final turn always streams as a single frame here.
        if let Some(sink) = stream_sink {
            if autonomous || (stream && !already_streamed) {
                StreamingBridge::emit_single(sink, accumulated.clone());
            }
        }

        Ok((accumulated, tool_calls_made))
    }

    async fn dispatcher_commands(&self, agent: &AgentSnapshot) -> Vec<crate::extension::CommandDescriptor> {
        let enabled = agent.enabled_command_names();
        self.dispatcher
            .all_commands()
            .await
            .into_iter()
            .filter(|c| enabled.contains(&c.name))
            .collect()
    }
}

async fn buffer_stream(mut provider_stream: crate::provider::TextDeltaStream) -> Result<String, ChainError> {
    use futures_util::StreamExt;
    let mut text = String::new();
    while let Some(delta) = provider_stream.next().await {
        let delta = delta.map_err(ChainError::from)?;
        text.push_str(&delta.content);
    }
    Ok(text)
}

/// Parses the fenced tool-call sentinel documented by `PromptAssembler`:
/// ` ```json\n{"command": "name", "args": {...}}\n``` `.
fn parse_tool_call(text: &str) -> Option<(String, HashMap<String, serde_json::Value>)> {
    let start = text.find("```json")?;
    let after_fence = &text[start + "```json".len()..];
    let end = after_fence.find("```")?;
    let body = after_fence[..end].trim();

    let parsed: serde_json::Value = serde_json::from_str(body).ok()?;
    let command = parsed.get("command")?.as_str()?.to_string();
    let args = parsed
        .get("args")
        .and_then(|v| v.as_object())
        .map(|obj| obj.clone().into_iter().collect())
        .unwrap_or_default();
    Some((command, args))
}

/// Bridges `ChainEngine`'s `prompt_type = prompt` steps back into
/// `AgentRuntime`'s full tool loop, via a weak handle (see module docs for
/// why this can't just be an `Arc<AgentRuntime>`).
struct WeakPromptRunner(Weak<AgentRuntime>);

#[async_trait]
impl PromptRunner for WeakPromptRunner {
    async fn run_prompt(
        &self,
        tenant_id: &str,
        agent_name: &str,
        user_input: &str,
        overrides: &HashMap<String, String>,
    ) -> Result<String, ChainError> {
        let runtime = self.0.upgrade().ok_or_else(|| ChainError::StepFailed {
            step: 0,
            cause: "agent runtime was dropped".to_string(),
        })?;
        // §4.5 step 2: a `prompt` step's target is `AgentRuntime.prompt` for
        // the step's effective agent — resolve through the same registered
        // settings a normal mode=prompt request would get. Fall back to a
        // blank snapshot only when the agent was never registered.
        let snapshot = match runtime.agents.snapshot(tenant_id, agent_name).await {
            Some(snapshot) => snapshot,
            None => crate::agent::Agent::new(tenant_id, agent_name).snapshot(),
        };
        let (text, _) = runtime
            .run_prompt_loop(&snapshot, "chain_step", user_input, false, &None, false, overrides)
            .await?;
        Ok(text)
    }
}

/// Implements the dispatcher's logging guarantee (§4.2) against
/// `ConversationStore`: records every dispatched command as a
/// `tool:<name>` interaction exactly once.
struct ConversationDispatchSink {
    conversation: ConversationStore,
    agent: AgentSnapshot,
    conversation_name: String,
    events: Arc<dyn EventHandler>,
}

#[async_trait]
impl DispatchSink for ConversationDispatchSink {
    async fn record_tool_call(&self, command_name: &str, _args: &serde_json::Value, outcome: &str, is_error: bool) {
        let role = format!("tool:{command_name}");
        let result = self
            .conversation
            .append(&self.agent.tenant_id, &self.agent.agent_name, &self.conversation_name, &role, outcome, is_error)
            .await;
        if let Ok(interaction) = result {
            self.events
                .on_request_event(&RequestEvent::InteractionAppended {
                    tenant_id: self.agent.tenant_id.clone(),
                    agent_name: self.agent.agent_name.clone(),
                    conversation_name: self.conversation_name.clone(),
                    role,
                    id: interaction.id,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::chain::{Chain, ChainStore, PromptType, Step};
    use crate::event::NullEventHandler;
    use crate::extension_registry::ExtensionRegistry;
    use crate::provider::Provider;
    use crate::provider_registry::ProviderRegistry;
    use crate::testing::{EchoExtension, FakeOutcome, FakeProvider};
    use tempfile::tempdir;

    fn registry_with(name: &str, script: Vec<FakeOutcome>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        let name_owned = name.to_string();
        registry.register(
            name,
            vec![Service::Llm],
            HashMap::new(),
            Arc::new(move |_settings| {
                Arc::new(FakeProvider::new(&name_owned, vec![Service::Llm]).with_script(script.clone())) as Arc<dyn Provider>
            }),
        );
        registry
    }

    async fn dispatcher_with_echo_registered() -> Arc<CommandDispatcher> {
        let registry = ExtensionRegistry::new();
        registry.register(Arc::new(EchoExtension)).await;
        Arc::new(CommandDispatcher::new(registry))
    }

    async fn runtime_with(registry: ProviderRegistry, dispatcher: Arc<CommandDispatcher>) -> (Arc<AgentRuntime>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let runtime = AgentRuntime::new(
            ProviderRouter::new(registry),
            dispatcher,
            ConversationStore::new(dir.path()),
            PromptTemplateStore::new(),
            None,
            Arc::new(NullEventHandler),
            ChainStore::new(),
            5,
            8,
            crate::agent::AgentStore::new(),
        );
        (runtime, dir)
    }

    #[tokio::test]
    async fn simple_prompt_round_trip_logs_user_and_assistant_turns() {
        let registry = registry_with("default", vec![FakeOutcome::Text("hello there".to_string())]);
        let (runtime, _dir) = runtime_with(registry, dispatcher_with_echo_registered().await).await;
        let agent = Agent::new("t1", "a1").snapshot();

        let response = runtime
            .handle(HandleRequest {
                agent: agent.clone(),
                conversation_name: "main".to_string(),
                user_input: "hi".to_string(),
                stream: false,
                log_output: true,
                stream_sink: None,
                overrides: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(response.text, "hello there");
        assert_eq!(response.tool_calls_made, 0);

        let history = runtime.conversation.export("t1", "a1", "main").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "assistant");
        assert_eq!(history[1].message, "hello there");
    }

    #[tokio::test]
    async fn log_output_false_suppresses_the_assistant_turn_only() {
        let registry = registry_with("default", vec![FakeOutcome::Text("quiet reply".to_string())]);
        let (runtime, _dir) = runtime_with(registry, dispatcher_with_echo_registered().await).await;
        let agent = Agent::new("t1", "a1").snapshot();

        runtime
            .handle(HandleRequest {
                agent,
                conversation_name: "main".to_string(),
                user_input: "hi".to_string(),
                stream: false,
                log_output: false,
                stream_sink: None,
                overrides: HashMap::new(),
            })
            .await
            .unwrap();

        let history = runtime.conversation.export("t1", "a1", "main").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "user");
    }

    #[tokio::test]
    async fn autonomous_tool_loop_dispatches_then_produces_final_reply() {
        let script = vec![
            FakeOutcome::Text("```json\n{\"command\": \"echo\", \"args\": {\"text\": \"hi\"}}\n```".to_string()),
            FakeOutcome::Text("done".to_string()),
        ];
        let registry = registry_with("default", script);
        let (runtime, _dir) = runtime_with(registry, dispatcher_with_echo_registered().await).await;
        let agent = Agent::new("t1", "a1")
            .with_setting("AUTONOMOUS_EXECUTION", true)
            .with_enabled_command("echo", true)
            .snapshot();

        let response = runtime
            .handle(HandleRequest {
                agent,
                conversation_name: "main".to_string(),
                user_input: "use the tool".to_string(),
                stream: false,
                log_output: true,
                stream_sink: None,
                overrides: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(response.text, "done");
        assert_eq!(response.tool_calls_made, 1);

        let history = runtime.conversation.export("t1", "a1", "main").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].role, "tool:echo");
        assert_eq!(history[1].message, "\"hi\"");
        assert_eq!(history[2].role, "assistant");
        assert_eq!(history[2].message, "done");
    }

    #[tokio::test]
    async fn mode_command_dispatches_without_touching_a_provider() {
        let registry = ProviderRegistry::new();
        let (runtime, _dir) = runtime_with(registry, dispatcher_with_echo_registered().await).await;
        let agent = Agent::new("t1", "a1")
            .with_setting("mode", "command")
            .with_setting("prompt_name", "echo")
            .with_enabled_command("echo", true)
            .snapshot();

        let response = runtime
            .handle(HandleRequest {
                agent,
                conversation_name: "main".to_string(),
                user_input: "{\"text\": \"direct\"}".to_string(),
                stream: false,
                log_output: true,
                stream_sink: None,
                overrides: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(response.text, "\"direct\"");
        assert_eq!(response.tool_calls_made, 1);
    }

    #[tokio::test]
    async fn mode_chain_runs_registered_steps_and_returns_final_output() {
        let mut prompt = HashMap::new();
        prompt.insert("user_input".to_string(), serde_json::Value::String("{user_input}".to_string()));
        let chains = ChainStore::new();
        chains
            .register(Chain {
                name: "greet".to_string(),
                steps: vec![Step {
                    step_number: 1,
                    agent_name: "a1".to_string(),
                    prompt_type: PromptType::Prompt,
                    prompt,
                }],
            })
            .await
            .unwrap();

        let registry = registry_with("default", vec![FakeOutcome::Text("step one reply".to_string())]);
        let dir = tempdir().unwrap();
        let runtime = AgentRuntime::new(
            ProviderRouter::new(registry),
            dispatcher_with_echo_registered().await,
            ConversationStore::new(dir.path()),
            PromptTemplateStore::new(),
            None,
            Arc::new(NullEventHandler),
            chains,
            5,
            8,
            crate::agent::AgentStore::new(),
        );

        let agent = Agent::new("t1", "a1").with_setting("mode", "chain").with_setting("prompt_name", "greet").snapshot();
        let response = runtime
            .handle(HandleRequest {
                agent,
                conversation_name: "greet".to_string(),
                user_input: "hello".to_string(),
                stream: false,
                log_output: true,
                stream_sink: None,
                overrides: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(response.text, "step one reply");
    }

    #[test]
    fn parse_tool_call_extracts_command_and_args() {
        let text = "preamble\n```json\n{\"command\": \"echo\", \"args\": {\"text\": \"hi\"}}\n```\ntrailer";
        let (command, args) = parse_tool_call(text).unwrap();
        assert_eq!(command, "echo");
        assert_eq!(args.get("text").unwrap().as_str().unwrap(), "hi");
    }

    #[test]
    fn parse_tool_call_returns_none_without_a_fenced_block() {
        assert!(parse_tool_call("just a normal reply").is_none());
    }
}
