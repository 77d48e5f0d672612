//! `ProviderRouter` (§4.1 steps 1-6).
//!
//! Grounded on `agent.rs`'s provider-call retry shape (try provider, back
//! off on transient failure, give up after a bounded number of attempts)
//! and `original_source/agixt/Providers.py::get_providers_by_service` for
//! candidate selection. The per-agent last-dispatch clock and per-request
//! failure counters are held as plain local/owned state rather than on the
//! `Provider` instance or behind a module-level static, per the §9 redesign
//! note and the Open Question resolution recorded in SPEC_FULL.md §9.

use crate::agent::AgentSnapshot;
use crate::error::ProviderError;
use crate::event::{EventHandler, RequestEvent};
use crate::provider::{InferenceOutput, InferenceRequest, Provider, Service};
use crate::provider_registry::ProviderRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Routes one inference call across the candidate providers for a service,
/// applying spacing, backoff, and rotation (§4.1).
///
/// Constructed once per application and shared (it is cheap to clone: the
/// registry and the last-dispatch clock are both `Arc`-backed), the same
/// way `ProviderRegistry` is shared.
#[derive(Clone)]
pub struct ProviderRouter {
    registry: ProviderRegistry,
    /// Last dispatch time per `(tenant_id, agent_name)`, used to enforce
    /// `wait_between_requests` (§4.1 step 4). Keyed by agent rather than by
    /// provider: the spec calls for spacing "since the agent's last
    /// dispatch to any provider".
    last_dispatch: Arc<RwLock<HashMap<String, Instant>>>,
}

impl ProviderRouter {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            last_dispatch: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn agent_key(agent: &AgentSnapshot) -> String {
        format!("{}/{}", agent.tenant_id, agent.agent_name)
    }

    /// Runs one routed inference call for `agent` against `service` (§4.1).
    ///
    /// `merged_settings` is passed through to [`ProviderRegistry::instantiate`]
    /// unchanged; building it (agent settings merged over provider defaults)
    /// is the caller's responsibility (`AgentRuntime`/`ChainEngine`).
    pub async fn route(
        &self,
        agent: &AgentSnapshot,
        service: Service,
        merged_settings: &HashMap<String, String>,
        request_template: &InferenceRequest,
        events: &dyn EventHandler,
    ) -> Result<InferenceOutput, ProviderError> {
        let candidates = self.ordered_candidates(agent, service);
        if candidates.is_empty() {
            return Err(ProviderError::Fatal(format!(
                "no provider declares service '{}'",
                service.as_str()
            )));
        }

        let max_failures_budget: u32 = candidates.len() as u32
            * candidates
                .iter()
                .filter_map(|name| self.registry.instantiate(name, merged_settings))
                .map(|p| p.max_failures())
                .max()
                .unwrap_or(3);

        let mut tried = Vec::new();
        let mut attempts: u32 = 0;
        let mut candidate_idx = 0usize;

        while candidate_idx < candidates.len() {
            let name = &candidates[candidate_idx];
            let provider = match self.registry.instantiate(name, merged_settings) {
                Some(p) => p,
                None => {
                    candidate_idx += 1;
                    continue;
                }
            };

            if !provider.is_configured() {
                tried.push(name.clone());
                candidate_idx += 1;
                continue;
            }

            let mut failure_count: u32 = 0;
            loop {
                if attempts >= max_failures_budget {
                    return Err(ProviderError::Exhausted { tried });
                }

                self.wait_for_spacing(agent, provider.as_ref()).await;
                attempts += 1;
                tried.push(name.clone());

                let result = provider.inference(request_template.clone()).await;
                self.mark_dispatched(agent).await;

                match result {
                    Ok(output) => return Ok(output),
                    Err(ProviderError::Fatal(msg)) => return Err(ProviderError::Fatal(msg)),
                    Err(ProviderError::Transient(msg)) => {
                        failure_count += 1;
                        if failure_count < provider.max_failures() {
                            tokio::time::sleep(provider.wait_after_failure()).await;
                            continue;
                        }

                        let next = candidates.get(candidate_idx + 1).cloned();
                        events
                            .on_request_event(&RequestEvent::ProviderRotated {
                                tenant_id: agent.tenant_id.clone(),
                                agent_name: agent.agent_name.clone(),
                                from_provider: name.clone(),
                                to_provider: next,
                                reason: msg,
                            })
                            .await;
                        candidate_idx += 1;
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        Err(ProviderError::Exhausted { tried })
    }

    /// Candidate providers for `service`, with the agent's preferred
    /// provider (if it's a valid candidate) moved to the front (§4.1
    /// steps 1-2).
    fn ordered_candidates(&self, agent: &AgentSnapshot, service: Service) -> Vec<String> {
        let mut candidates = self.registry.providers_for_service(service);
        let preferred = agent.preferred_provider(service.settings_key());
        if let Some(pos) = candidates.iter().position(|c| c == &preferred) {
            let primary = candidates.remove(pos);
            candidates.insert(0, primary);
        }
        candidates
    }

    async fn wait_for_spacing(&self, agent: &AgentSnapshot, provider: &dyn Provider) {
        let spacing = provider.wait_between_requests();
        if spacing.is_zero() {
            return;
        }
        let key = Self::agent_key(agent);
        let last = self.last_dispatch.read().await.get(&key).copied();
        if let Some(last) = last {
            let elapsed = last.elapsed();
            if elapsed < spacing {
                tokio::time::sleep(spacing - elapsed).await;
            }
        }
    }

    async fn mark_dispatched(&self, agent: &AgentSnapshot) {
        self.last_dispatch
            .write()
            .await
            .insert(Self::agent_key(agent), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::testing::FakeOutcome;
    use std::sync::Arc as StdArc;

    fn request() -> InferenceRequest {
        InferenceRequest {
            prompt: "hi".to_string(),
            input_tokens: 1,
            images: vec![],
            stream: false,
            use_smartest: false,
            model: None,
        }
    }

    fn registry_with(providers: Vec<(&str, Vec<FakeOutcome>)>) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for (name, script) in providers {
            let name_owned = name.to_string();
            registry.register(
                name,
                vec![Service::Llm],
                HashMap::new(),
                StdArc::new(move |_settings| {
                    StdArc::new(
                        crate::testing::FakeProvider::new(&name_owned, vec![Service::Llm])
                            .with_script(script.clone()),
                    ) as StdArc<dyn Provider>
                }),
            );
        }
        registry
    }

    #[tokio::test]
    async fn single_healthy_provider_succeeds_on_first_attempt() {
        let registry = registry_with(vec![("default", vec![FakeOutcome::Text("hello".into())])]);
        let router = ProviderRouter::new(registry);
        let agent = Agent::new("t1", "a1").snapshot();

        let output = router
            .route(&agent, Service::Llm, &HashMap::new(), &request(), &crate::event::NullEventHandler)
            .await
            .unwrap();

        match output {
            InferenceOutput::Text(text) => assert_eq!(text, "hello"),
            _ => panic!("expected text output"),
        }
    }

    #[tokio::test]
    async fn rotates_to_next_candidate_after_repeated_transient_failures() {
        let registry = registry_with(vec![
            (
                "alpha",
                vec![
                    FakeOutcome::Transient("down".into()),
                    FakeOutcome::Transient("down".into()),
                    FakeOutcome::Transient("down".into()),
                ],
            ),
            ("beta", vec![FakeOutcome::Text("from beta".into())]),
        ]);
        let router = ProviderRouter::new(registry);
        let agent = Agent::new("t1", "a1").snapshot();

        let output = router
            .route(&agent, Service::Llm, &HashMap::new(), &request(), &crate::event::NullEventHandler)
            .await
            .unwrap();

        match output {
            InferenceOutput::Text(text) => assert_eq!(text, "from beta"),
            _ => panic!("expected text output"),
        }
    }

    #[tokio::test]
    async fn fatal_failure_surfaces_immediately_without_rotation() {
        let registry = registry_with(vec![
            ("alpha", vec![FakeOutcome::Fatal("bad key".into())]),
            ("beta", vec![FakeOutcome::Text("unused".into())]),
        ]);
        let router = ProviderRouter::new(registry);
        let agent = Agent::new("t1", "a1").snapshot();

        let err = router
            .route(&agent, Service::Llm, &HashMap::new(), &request(), &crate::event::NullEventHandler)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Fatal(_)));
    }

    #[tokio::test]
    async fn exhausts_when_every_candidate_stays_transient() {
        let registry = registry_with(vec![
            ("alpha", vec![FakeOutcome::Transient("down".into())]),
            ("beta", vec![FakeOutcome::Transient("down".into())]),
        ]);
        let router = ProviderRouter::new(registry);
        let agent = Agent::new("t1", "a1").snapshot();

        let err = router
            .route(&agent, Service::Llm, &HashMap::new(), &request(), &crate::event::NullEventHandler)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn preferred_provider_is_tried_first() {
        let registry = registry_with(vec![
            ("alpha", vec![FakeOutcome::Text("alpha wins".into())]),
            ("beta", vec![FakeOutcome::Text("beta wins".into())]),
        ]);
        let router = ProviderRouter::new(registry);
        let agent = Agent::new("t1", "a1").with_setting("provider", "beta").snapshot();

        let output = router
            .route(&agent, Service::Llm, &HashMap::new(), &request(), &crate::event::NullEventHandler)
            .await
            .unwrap();

        match output {
            InferenceOutput::Text(text) => assert_eq!(text, "beta wins"),
            _ => panic!("expected text output"),
        }
    }

    #[tokio::test]
    async fn no_candidates_for_service_is_a_fatal_error() {
        let registry = ProviderRegistry::new();
        let router = ProviderRouter::new(registry);
        let agent = Agent::new("t1", "a1").snapshot();

        let err = router
            .route(&agent, Service::Llm, &HashMap::new(), &request(), &crate::event::NullEventHandler)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Fatal(_)));
    }
}
