use serde::{Deserialize, Serialize};

/// Token usage reported by a provider for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Token counts and USD cost for one provider call, or accumulated over a
/// whole run. Accumulation is monotonic: `add` only ever increases fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
}

impl CostInfo {
    pub fn from_usage(usage: &TokenUsage, input_per_mtok: f64, output_per_mtok: f64) -> Self {
        let input_cost = usage.input_tokens as f64 / 1_000_000.0 * input_per_mtok;
        let output_cost = usage.output_tokens as f64 / 1_000_000.0 * output_per_mtok;
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            input_cost_usd: input_cost,
            output_cost_usd: output_cost,
            total_cost_usd: input_cost + output_cost,
        }
    }

    pub fn add(&mut self, other: &CostInfo) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.input_cost_usd += other.input_cost_usd;
        self.output_cost_usd += other.output_cost_usd;
        self.total_cost_usd += other.total_cost_usd;
    }
}
