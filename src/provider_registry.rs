//! `ProviderRegistry` (§4.1 registry contract).
//!
//! Grounded on `original_source/agixt/Providers.py`'s
//! `get_providers_by_service` capability filtering, with its anti-patterns
//! removed per §9: the original discovers providers via `__getattr__` on a
//! module-level wrapper and reassigns the disabled-providers list from a
//! `DISABLED_PROVIDERS` environment variable at import time. Here, the
//! registry is an explicit value constructed once by the embedding
//! application and passed by reference — discovery is pluggable (tests
//! register fakes, per §4.1's "the core must accept an injected registry")
//! but never a global/static lookup.

use crate::provider::{Provider, Service};
use std::collections::HashMap;
use std::sync::Arc;

/// Declared settings schema for a provider: setting name → default value.
pub type SettingsSchema = HashMap<String, String>;

/// A factory that instantiates a [`Provider`] from merged agent+provider
/// settings. Boxed so the registry can hold heterogeneous constructors.
pub type ProviderFactory =
    Arc<dyn Fn(&HashMap<String, String>) -> Arc<dyn Provider> + Send + Sync>;

struct RegisteredProvider {
    services: Vec<Service>,
    settings_schema: SettingsSchema,
    factory: ProviderFactory,
}

/// Discovers provider adapters and holds their declared capabilities and
/// default settings (§2, §4.1).
///
/// The registry itself does not instantiate providers eagerly — it holds a
/// factory per name and builds a fresh [`Provider`] instance on
/// [`ProviderRegistry::instantiate`], directly satisfying the §9 redesign
/// note against constructing one mutated shared client across requests.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<RegisteredProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under `name` with its declared `services`,
    /// `settings_schema`, and a `factory` used to build live instances.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        services: Vec<Service>,
        settings_schema: SettingsSchema,
        factory: ProviderFactory,
    ) {
        self.providers.insert(
            name.into(),
            Arc::new(RegisteredProvider {
                services,
                settings_schema,
                factory,
            }),
        );
    }

    /// `list() -> [name]`.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// `capabilities(name) -> set<service>`.
    pub fn capabilities(&self, name: &str) -> Option<&[Service]> {
        self.providers.get(name).map(|p| p.services.as_slice())
    }

    /// `settings_schema(name) -> {key: default}`.
    pub fn settings_schema(&self, name: &str) -> Option<&SettingsSchema> {
        self.providers.get(name).map(|p| &p.settings_schema)
    }

    /// `instantiate(name, merged_settings) -> Provider`.
    pub fn instantiate(
        &self,
        name: &str,
        merged_settings: &HashMap<String, String>,
    ) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).map(|p| (p.factory)(merged_settings))
    }

    /// Providers declaring `service`, in deterministic name order (§4.1 step 1,
    /// §4.1 "Ordering/tie-breaks: deterministic by candidate name").
    ///
    /// Direct analogue of `Providers.get_providers_by_service(service)`.
    pub fn providers_for_service(&self, service: Service) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .iter()
            .filter(|(_, p)| p.services.contains(&service))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn dummy_factory() -> ProviderFactory {
        Arc::new(|_settings| {
            Arc::new(crate::testing::FakeProvider::new("dummy", vec![Service::Llm])) as Arc<dyn Provider>
        })
    }

    #[test]
    fn list_is_sorted_and_empty_by_default() {
        let registry = ProviderRegistry::new();
        assert!(registry.list().is_empty());
    }

    #[test]
    fn register_and_list_providers() {
        let mut registry = ProviderRegistry::new();
        registry.register("zeta", vec![Service::Llm], HashMap::new(), dummy_factory());
        registry.register("alpha", vec![Service::Vision], HashMap::new(), dummy_factory());
        assert_eq!(registry.list(), vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn providers_for_service_filters_and_sorts() {
        let mut registry = ProviderRegistry::new();
        registry.register("p2", vec![Service::Llm], HashMap::new(), dummy_factory());
        registry.register("p1", vec![Service::Llm, Service::Vision], HashMap::new(), dummy_factory());
        registry.register("p3", vec![Service::Vision], HashMap::new(), dummy_factory());

        let llm_providers = registry.providers_for_service(Service::Llm);
        assert_eq!(llm_providers, vec!["p1".to_string(), "p2".to_string()]);
    }

    #[test]
    fn instantiate_builds_a_fresh_instance_each_call() {
        let mut registry = ProviderRegistry::new();
        registry.register("p1", vec![Service::Llm], HashMap::new(), dummy_factory());
        let settings = HashMap::new();
        let a = registry.instantiate("p1", &settings).unwrap();
        let b = registry.instantiate("p1", &settings).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn capabilities_and_settings_schema_lookup_unknown_returns_none() {
        let registry = ProviderRegistry::new();
        assert!(registry.capabilities("nope").is_none());
        assert!(registry.settings_schema("nope").is_none());
        assert!(registry.instantiate("nope", &HashMap::new()).is_none());
    }
}
