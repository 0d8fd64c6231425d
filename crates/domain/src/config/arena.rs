use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{ContextPolicy, ProviderSpec, ScenarioSpec};

/// An entry that is either inline or a reference to another YAML file,
/// resolved relative to the arena file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Entry<T> {
    File { file: PathBuf },
    Inline(T),
}

/// One variable a prompt config consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A named system prompt plus the variables it expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub name: String,
    pub system_prompt: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, VariableSpec>,
}

/// Retry policy for transient provider failures. The spec-level defaults
/// (3 attempts, 500 ms base, factor 2, ±20% jitter) are deliberate
/// configuration, not constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "d_factor")]
    pub factor: f64,
    /// Fractional jitter applied symmetrically around the computed delay.
    #[serde(default = "d_jitter")]
    pub jitter: f64,
}

fn d_max_attempts() -> u32 {
    3
}
fn d_base_delay_ms() -> u64 {
    500
}
fn d_factor() -> f64 {
    2.0
}
fn d_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            base_delay_ms: d_base_delay_ms(),
            factor: d_factor(),
            jitter: d_jitter(),
        }
    }
}

/// Built-in guardrails to register, in this order: banned words, length,
/// max sentences, required fields. Zero/empty values disable a guardrail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub banned_words: Vec<String>,
    #[serde(default)]
    pub max_chars: usize,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sentences: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_fields: Vec<String>,
}

impl GuardrailsConfig {
    pub fn is_empty(&self) -> bool {
        self.banned_words.is_empty()
            && self.max_chars == 0
            && self.max_tokens == 0
            && self.max_sentences.is_none()
            && self.required_fields.is_empty()
    }
}

/// Timeouts in seconds; the innermost applicable timeout wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "d_provider_call_secs")]
    pub provider_call_secs: u64,
    #[serde(default = "d_turn_secs")]
    pub turn_secs: u64,
    #[serde(default = "d_run_secs")]
    pub run_secs: u64,
    /// Scheduler-global deadline; unset means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_deadline_secs: Option<u64>,
}

fn d_provider_call_secs() -> u64 {
    60
}
fn d_turn_secs() -> u64 {
    300
}
fn d_run_secs() -> u64 {
    900
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_call_secs: d_provider_call_secs(),
            turn_secs: d_turn_secs(),
            run_secs: d_run_secs(),
            global_deadline_secs: None,
        }
    }
}

/// Suite-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaDefaults {
    #[serde(default = "d_concurrency")]
    pub concurrency: usize,
    #[serde(default = "d_output")]
    pub output: PathBuf,
    /// Result formats to write: json, markdown, junit, html.
    #[serde(default = "d_formats")]
    pub formats: Vec<String>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_policy: Option<ContextPolicy>,
    #[serde(default = "d_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn d_concurrency() -> usize {
    4
}
fn d_output() -> PathBuf {
    PathBuf::from("out")
}
fn d_formats() -> Vec<String> {
    vec!["json".into(), "markdown".into()]
}
fn d_max_tool_calls() -> u32 {
    8
}

impl Default for ArenaDefaults {
    fn default() -> Self {
        Self {
            concurrency: d_concurrency(),
            output: d_output(),
            formats: d_formats(),
            streaming: false,
            context_policy: None,
            max_tool_calls: d_max_tool_calls(),
            guardrails: GuardrailsConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// `spec` of a `kind: Arena` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArenaSpec {
    /// Arena-level variables: the highest-priority layer of variable
    /// resolution.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<Entry<ProviderSpec>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prompt_configs: Vec<PromptConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenarios: Vec<Entry<ScenarioSpec>>,
    #[serde(default)]
    pub defaults: ArenaDefaultsOpt,
}

/// `defaults` block with every field optional, so a partial block overlays
/// the built-in defaults instead of replacing them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArenaDefaultsOpt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_policy: Option<ContextPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
    #[serde(default, skip_serializing_if = "GuardrailsConfig::is_empty")]
    pub guardrails: GuardrailsConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<TimeoutConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl ArenaDefaultsOpt {
    pub fn resolve(&self) -> ArenaDefaults {
        let base = ArenaDefaults::default();
        ArenaDefaults {
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            output: self.output.clone().unwrap_or(base.output),
            formats: if self.formats.is_empty() {
                base.formats
            } else {
                self.formats.clone()
            },
            streaming: self.streaming.unwrap_or(base.streaming),
            context_policy: self.context_policy.or(base.context_policy),
            max_tool_calls: self.max_tool_calls.unwrap_or(base.max_tool_calls),
            guardrails: self.guardrails.clone(),
            timeouts: self.timeouts.unwrap_or(base.timeouts),
            retry: self.retry.unwrap_or(base.retry),
        }
    }
}
