use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which adapter implements a provider entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    Anthropic,
    Gemini,
    /// Any other endpoint speaking the OpenAI chat-completions contract.
    OpenaiCompat,
    /// Deterministic scripted provider for tests.
    Mock,
}

/// Hosting platform for cloud-routed models. `Direct` talks to the vendor
/// API directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Bedrock,
    Vertex,
    Azure,
    #[default]
    Direct,
}

/// Where the API key comes from. Resolution is lazy: nothing is read until
/// the first provider call is built, and the resolved secret is never stored
/// on a run result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,
}

impl CredentialSpec {
    pub fn from_env(var: impl Into<String>) -> Self {
        Self {
            env: Some(var.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.env.is_none() && self.file.is_none() && self.inline.is_none()
    }
}

/// Request knobs applied when a scenario does not override them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Per-model pricing override, USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingSpec {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

/// `spec` of a `kind: Provider` document, or an inline provider entry in an
/// arena file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "CredentialSpec::is_empty")]
    pub credential: CredentialSpec,
    #[serde(default)]
    pub defaults: RequestDefaults,
    /// Endpoint override, required for `openai_compat`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingSpec>,
}

impl ProviderSpec {
    /// The regions this provider expands to in the run matrix. A provider
    /// with no region configured contributes exactly one region-less cell.
    pub fn matrix_regions(&self) -> Vec<Option<String>> {
        if !self.regions.is_empty() {
            self.regions.iter().cloned().map(Some).collect()
        } else if let Some(region) = &self.region {
            vec![Some(region.clone())]
        } else {
            vec![None]
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_yaml() {
        let spec: ProviderSpec = serde_yaml::from_str(
            "id: claude\ntype: anthropic\nmodel: claude-sonnet-4-5\ncredential:\n  env: ANTHROPIC_API_KEY\ndefaults:\n  temperature: 0.2\n",
        )
        .unwrap();
        assert_eq!(spec.kind, ProviderKind::Anthropic);
        assert_eq!(spec.credential.env.as_deref(), Some("ANTHROPIC_API_KEY"));
        assert_eq!(spec.defaults.temperature, Some(0.2));
        assert_eq!(spec.platform(), Platform::Direct);
    }

    #[test]
    fn matrix_regions_expansion() {
        let mut spec: ProviderSpec =
            serde_yaml::from_str("id: p\ntype: mock\nmodel: m\n").unwrap();
        assert_eq!(spec.matrix_regions(), vec![None]);

        spec.region = Some("us-east-1".into());
        assert_eq!(spec.matrix_regions(), vec![Some("us-east-1".into())]);

        spec.regions = vec!["us-east-1".into(), "eu-west-1".into()];
        assert_eq!(spec.matrix_regions().len(), 2);
    }
}
