//! Provider registry.
//!
//! Instantiates the right adapter for every configured provider spec and
//! holds the shared `Arc` handles handed to runs. With the mock override
//! (CLI `--mock-provider`) every spec maps to a [`MockProvider`] so suites
//! run offline.

use std::collections::HashMap;
use std::sync::Arc;

use pk_domain::config::{ProviderKind, ProviderSpec};
use pk_domain::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::mock::MockProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::Provider;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build all providers from their specs. `mock_override` replaces every
    /// entry with a mock keeping the configured id.
    pub fn from_specs(specs: &[ProviderSpec], mock_override: bool) -> Result<Self> {
        let mut registry = Self::new();
        for spec in specs {
            let provider: Arc<dyn Provider> = if mock_override || spec.kind == ProviderKind::Mock {
                Arc::new(MockProvider::new(&spec.id).with_model(&spec.model))
            } else {
                match spec.kind {
                    ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_spec(spec)?),
                    ProviderKind::Openai
                    | ProviderKind::Gemini
                    | ProviderKind::OpenaiCompat => {
                        Arc::new(OpenAiCompatProvider::from_spec(spec)?)
                    }
                    ProviderKind::Mock => unreachable!("handled above"),
                }
            };
            registry.register(provider);
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown provider: {id}")))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_spec(id: &str) -> ProviderSpec {
        serde_yaml::from_str(&format!("id: {id}\ntype: mock\nmodel: mock-1\n")).unwrap()
    }

    #[test]
    fn builds_mock_from_spec() {
        let registry = ProviderRegistry::from_specs(&[mock_spec("m1")], false).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("m1").unwrap().id(), "m1");
        assert!(registry.get("other").is_err());
    }

    #[test]
    fn mock_override_replaces_real_adapters() {
        let spec: ProviderSpec = serde_yaml::from_str(
            "id: claude\ntype: anthropic\nmodel: claude-sonnet-4-5\ncredential:\n  env: NOT_SET\n",
        )
        .unwrap();
        let registry = ProviderRegistry::from_specs(&[spec], true).unwrap();
        let provider = registry.get("claude").unwrap();
        // The mock advertises every capability; a real adapter would not
        // support duplex.
        assert!(provider.capabilities().supports_duplex);
    }
}
