//! Provider registry
//!
//! Maps the provider key of a task's model descriptor to a provider
//! instance. Lookup of an unknown key is the `ProviderMissing` condition.

use super::anthropic::AnthropicProvider;
use super::google::GoogleProvider;
use super::openai::OpenAIProvider;
use super::proxy::ProxyProvider;
use super::LLMProvider;
use crate::config::Config;
use sdk::errors::EngineError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LLMProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every known provider from configuration
    pub fn from_config(config: &Config) -> Self {
        let max_tokens = config.llm.max_tokens;
        let timeout = config.llm.request_timeout_secs;

        let mut registry = Self::new();
        registry.register(Arc::new(AnthropicProvider::new(
            config.llm.anthropic.clone(),
            max_tokens,
            timeout,
        )));
        registry.register(Arc::new(OpenAIProvider::new(
            config.llm.openai.clone(),
            max_tokens,
            timeout,
        )));
        registry.register(Arc::new(GoogleProvider::new(
            config.llm.google.clone(),
            max_tokens,
            timeout,
        )));
        registry.register(Arc::new(ProxyProvider::new(
            config.llm.proxy.clone(),
            max_tokens,
            timeout,
        )));
        registry
    }

    /// Register a provider under its own name, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn LLMProvider>) {
        debug!("Registering LLM provider: {}", provider.name());
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn LLMProvider>> {
        self.providers.get(key).cloned()
    }

    /// Look up a provider, failing with `ProviderMissing`
    pub fn resolve(&self, key: &str) -> Result<Arc<dyn LLMProvider>, EngineError> {
        self.get(key)
            .ok_or_else(|| EngineError::ProviderMissing(key.to_string()))
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedProvider;

    #[test]
    fn test_from_config_registers_all_backends() {
        let registry = ProviderRegistry::from_config(&Config::default());
        assert_eq!(registry.keys(), vec!["anthropic", "google", "openai", "proxy"]);
    }

    #[test]
    fn test_resolve_unknown_key() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("mistral").err().unwrap();
        assert!(matches!(err, EngineError::ProviderMissing(ref key) if key == "mistral"));
    }

    #[test]
    fn test_register_replaces_by_name() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::named("anthropic")));
        registry.register(Arc::new(ScriptedProvider::named("anthropic")));
        assert_eq!(registry.keys(), vec!["anthropic"]);
        assert!(registry.get("anthropic").is_some());
    }
}
