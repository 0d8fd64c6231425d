//! Context-budget enforcement.
//!
//! Before every provider call the runner hands the conversation history to
//! [`enforce_budget`], which estimates token usage and applies the scenario's
//! [`ContextPolicy`]: drop the oldest non-system messages, fail, or (for the
//! reserved strategies) fall back to dropping with a warning.

pub mod estimator;

pub use estimator::{TokenEstimator, WordCountEstimator};

use pk_domain::config::{ContextPolicy, ContextStrategy};
use pk_domain::message::{Message, Role};
use pk_domain::{Error, Result};

/// What the budget pass did to the history.
#[derive(Debug, Clone)]
pub struct ContextOutcome {
    pub messages: Vec<Message>,
    pub truncated: bool,
    pub original_count: usize,
    pub kept_count: usize,
    pub dropped_count: usize,
    /// Set when a reserved strategy fell back to `oldest`.
    pub fallback_from: Option<ContextStrategy>,
}

impl ContextOutcome {
    fn untouched(messages: Vec<Message>) -> Self {
        let count = messages.len();
        Self {
            messages,
            truncated: false,
            original_count: count,
            kept_count: count,
            dropped_count: 0,
            fallback_from: None,
        }
    }
}

/// Estimated token count of one message's textual payload.
fn message_tokens(estimator: &dyn TokenEstimator, message: &Message) -> u32 {
    let mut tokens = estimator.estimate(&message.get_content());
    for call in &message.tool_calls {
        tokens += estimator.estimate(&call.args.to_string());
    }
    tokens
}

/// Apply a context policy to a conversation history.
///
/// The available budget is `token_budget - reserve_for_output -
/// tokens(system)`. A history that fits is passed through untouched.
/// Otherwise the strategy decides: `oldest` drops the oldest non-system
/// messages until the remainder fits (always preserving the final message),
/// `fail` returns [`Error::BudgetExceeded`], and the reserved strategies
/// fall back to `oldest`.
pub fn enforce_budget(
    policy: &ContextPolicy,
    estimator: &dyn TokenEstimator,
    system: &str,
    messages: Vec<Message>,
) -> Result<ContextOutcome> {
    let system_tokens = estimator.estimate(system);
    let budget = policy
        .token_budget
        .saturating_sub(policy.reserve_for_output)
        .saturating_sub(system_tokens);

    let per_message: Vec<u32> = messages
        .iter()
        .map(|m| message_tokens(estimator, m))
        .collect();
    let have: u32 = per_message.iter().sum();

    if have <= budget {
        return Ok(ContextOutcome::untouched(messages));
    }

    let fallback_from = match policy.strategy {
        ContextStrategy::Fail => {
            return Err(Error::BudgetExceeded { have, budget });
        }
        ContextStrategy::Oldest => None,
        reserved @ (ContextStrategy::Summarize | ContextStrategy::Relevance) => {
            tracing::warn!(
                strategy = ?reserved,
                "context strategy not implemented, falling back to oldest"
            );
            Some(reserved)
        }
    };

    // Drop oldest non-system messages until the remainder fits. The most
    // recent message is never dropped, even when it alone exceeds the budget.
    let original_count = messages.len();
    let mut kept: Vec<(Message, u32)> = messages.into_iter().zip(per_message).collect();
    let mut total = have;
    let mut dropped_count = 0usize;

    while total > budget {
        let Some(pos) = kept
            .iter()
            .enumerate()
            .take(kept.len().saturating_sub(1))
            .find(|(_, (m, _))| m.role != Role::System)
            .map(|(i, _)| i)
        else {
            break;
        };
        let (_, tokens) = kept.remove(pos);
        total -= tokens;
        dropped_count += 1;
    }

    let kept_count = kept.len();
    Ok(ContextOutcome {
        messages: kept.into_iter().map(|(m, _)| m).collect(),
        truncated: dropped_count > 0,
        original_count,
        kept_count,
        dropped_count,
        fallback_from,
    })
}
