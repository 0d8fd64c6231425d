use serde::{Deserialize, Serialize};

/// How the context middleware reacts when the history exceeds the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStrategy {
    /// Drop oldest non-system messages until the history fits.
    #[default]
    Oldest,
    /// Refuse with a budget error.
    Fail,
    /// Reserved. Falls back to `oldest` with a warning until implemented.
    Summarize,
    /// Reserved. Falls back to `oldest` with a warning until implemented.
    Relevance,
}

/// Token-budget policy applied before every provider call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextPolicy {
    pub token_budget: u32,
    #[serde(default = "d_reserve_for_output")]
    pub reserve_for_output: u32,
    #[serde(default)]
    pub strategy: ContextStrategy,
    /// Mark the system prompt with a prompt-cache hint for providers that
    /// support it; others ignore the hint.
    #[serde(default)]
    pub cache_breakpoints: bool,
}

fn d_reserve_for_output() -> u32 {
    1024
}
