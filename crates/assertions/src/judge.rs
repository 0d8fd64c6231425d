//! LLM-as-judge assertion.
//!
//! Sends the transcript and a rubric to a separate judge provider and
//! expects a JSON verdict `{"score": 0.0..1.0, "reasoning": "..."}`.
//! Judge-side failures (transport, timeout, unparseable verdict) are
//! reported as `passed = false` with a diagnostic `details.error`, never
//! raised as run errors.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use pk_domain::clock::Clock;
use pk_domain::message::Message;
use pk_domain::validation::ValidationResult;
use pk_providers::{PredictionRequest, Provider};

use crate::json::extract_json_payload;
use crate::{Assertion, Subject};

const JUDGE_SYSTEM_PROMPT: &str = "You are an impartial evaluator of AI assistant \
conversations. Score how well the conversation satisfies the rubric. Respond with \
only a JSON object: {\"score\": <number between 0 and 1>, \"reasoning\": \"<one \
or two sentences>\"}.";

#[derive(Debug, Deserialize)]
pub struct LlmJudgeParams {
    pub rubric: String,
    #[serde(default = "d_threshold")]
    pub threshold: f64,
    /// Provider id to judge with; falls back to the registry's default
    /// judge.
    #[serde(default)]
    pub judge_provider: Option<String>,
}

fn d_threshold() -> f64 {
    0.7
}

#[derive(Debug, Deserialize)]
struct Verdict {
    score: f64,
    #[serde(default)]
    reasoning: String,
}

pub struct LlmJudgeAssertion {
    pub rubric: String,
    pub threshold: f64,
    pub provider: Arc<dyn Provider>,
    pub clock: Arc<dyn Clock>,
}

impl LlmJudgeAssertion {
    fn failure(&self, error: String, duration_ms: u64) -> ValidationResult {
        ValidationResult::fail(self.kind(), "judge call failed")
            .with_detail("error", Value::String(error))
            .with_detail("duration_ms", serde_json::json!(duration_ms))
    }
}

#[async_trait::async_trait]
impl Assertion for LlmJudgeAssertion {
    fn kind(&self) -> &str {
        "llm_judge"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        let prompt = format!(
            "Rubric: {}\n\nConversation:\n{}\n\nScore the conversation against the rubric.",
            self.rubric,
            subject.transcript()
        );
        let request = PredictionRequest {
            system: Some(JUDGE_SYSTEM_PROMPT.to_string()),
            messages: vec![Message::user(prompt)],
            temperature: Some(0.0),
            ..Default::default()
        };

        let started = self.clock.now();
        let response = self.provider.predict(request).await;
        let duration_ms = (self.clock.now() - started).num_milliseconds().max(0) as u64;

        let response = match response {
            Ok(response) => response,
            Err(e) => return self.failure(e.to_string(), duration_ms),
        };

        let text = response.message.get_content();
        let Some(payload) = extract_json_payload(&text, true, true) else {
            return self.failure(format!("judge returned non-JSON verdict: {text:?}"), duration_ms);
        };
        let verdict: Verdict = match serde_json::from_value(payload) {
            Ok(verdict) => verdict,
            Err(e) => return self.failure(format!("malformed verdict: {e}"), duration_ms),
        };

        let score = verdict.score.clamp(0.0, 1.0);
        let passed = score >= self.threshold;
        let mut result = if passed {
            ValidationResult::pass(self.kind())
        } else {
            ValidationResult::fail(
                self.kind(),
                format!("score {score:.2} below threshold {:.2}", self.threshold),
            )
        };
        result = result
            .with_detail("score", serde_json::json!(score))
            .with_detail("reasoning", Value::String(verdict.reasoning))
            .with_detail("duration_ms", serde_json::json!(duration_ms))
            .with_detail("threshold", serde_json::json!(self.threshold));
        result
    }
}
