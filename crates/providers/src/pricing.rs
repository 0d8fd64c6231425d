//! Per-model pricing, USD per million tokens.
//!
//! The built-in table covers the common hosted models by prefix match;
//! provider configs can override it per entry. Unknown models cost zero so
//! that cost accumulation stays well-defined.

use pk_domain::config::PricingSpec;
use pk_domain::cost::{CostInfo, TokenUsage};

/// `(model prefix, input $/MTok, output $/MTok)`.
const DEFAULT_PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1", 2.00, 8.00),
    ("o3", 2.00, 8.00),
    ("claude-opus", 15.00, 75.00),
    ("claude-sonnet", 3.00, 15.00),
    ("claude-haiku", 0.80, 4.00),
    ("gemini-1.5-pro", 1.25, 5.00),
    ("gemini-2.0-flash", 0.10, 0.40),
    ("mock-", 1.00, 2.00),
];

/// Resolve `(input, output)` pricing for a model, preferring an explicit
/// override from the provider config.
pub fn lookup(model: &str, override_spec: Option<&PricingSpec>) -> (f64, f64) {
    if let Some(spec) = override_spec {
        return (spec.input_per_mtok, spec.output_per_mtok);
    }
    DEFAULT_PRICES
        .iter()
        .find(|(prefix, _, _)| model.starts_with(prefix))
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or((0.0, 0.0))
}

/// Convert reported usage into a cost record for this model.
pub fn cost_for(model: &str, usage: &TokenUsage, override_spec: Option<&PricingSpec>) -> CostInfo {
    let (input, output) = lookup(model, override_spec);
    CostInfo::from_usage(usage, input, output)
}
