//! Deterministic scripted provider for tests.
//!
//! Responses are keyed by `{scenario_id, turn_index}`; each key holds a
//! queue so a single turn's tool loop can script the tool-call response and
//! the follow-up completion separately. Unkeyed calls fall back to a
//! rotating default list. All capability flags are enabled so any scenario
//! can run against the mock.

use std::collections::HashMap;
use std::collections::VecDeque;

use parking_lot::Mutex;

use pk_domain::capability::ProviderCapabilities;
use pk_domain::cost::TokenUsage;
use pk_domain::message::{Message, ToolCall};
use pk_domain::stream::{BoxStream, FinishReason, StreamChunk};
use pk_domain::{Error, ErrorClass, Result};

use crate::pricing;
use crate::traits::{PredictionRequest, PredictionResponse, Provider};

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    /// Fail the call instead of answering.
    pub error: Option<(ErrorClass, String)>,
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            error: None,
        }
    }

    /// A reply that invokes `name` with `args` (finish reason `tool_calls`).
    pub fn tool_call(name: impl Into<String>, args: serde_json::Value) -> Self {
        let name = name.into();
        Self {
            text: String::new(),
            tool_calls: vec![ToolCall {
                id: format!("call_{name}_0"),
                name,
                args,
            }],
            finish_reason: FinishReason::ToolCalls,
            error: None,
        }
    }

    /// A failing call with the given provider error class.
    pub fn error(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Error,
            error: Some((class, message.into())),
        }
    }
}

#[derive(Default)]
struct Script {
    keyed: HashMap<(String, usize), VecDeque<MockResponse>>,
    defaults: Vec<MockResponse>,
    rotation: usize,
}

/// Scripted in-memory provider. Cheap to clone behind an `Arc`; interior
/// state only tracks which scripted response to serve next.
pub struct MockProvider {
    id: String,
    model: String,
    capabilities: ProviderCapabilities,
    script: Mutex<Script>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: "mock-1".into(),
            capabilities: ProviderCapabilities::all(),
            script: Mutex::new(Script::default()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Script a response for a specific `{scenario_id, turn_index}` cell.
    /// Repeated calls for the same key queue up in order.
    pub fn script(self, scenario_id: &str, turn_index: usize, response: MockResponse) -> Self {
        self.script
            .lock()
            .keyed
            .entry((scenario_id.to_string(), turn_index))
            .or_default()
            .push_back(response);
        self
    }

    /// Add a rotating default response, used when no keyed script matches.
    pub fn with_default(self, response: MockResponse) -> Self {
        self.script.lock().defaults.push(response);
        self
    }

    fn next_response(&self, req: &PredictionRequest) -> MockResponse {
        let mut script = self.script.lock();

        if let (Some(scenario), Some(turn)) = (&req.scenario_id, req.turn_index) {
            if let Some(queue) = script.keyed.get_mut(&(scenario.clone(), turn)) {
                if let Some(response) = queue.pop_front() {
                    return response;
                }
            }
        }

        if script.defaults.is_empty() {
            return MockResponse::text("mock response");
        }
        let idx = script.rotation % script.defaults.len();
        script.rotation += 1;
        script.defaults[idx].clone()
    }

    /// Deterministic usage: input scales with the request text, output with
    /// the scripted reply.
    fn usage_for(req: &PredictionRequest, response: &MockResponse) -> TokenUsage {
        let input_words: usize = req
            .messages
            .iter()
            .map(|m| m.get_content().split_whitespace().count())
            .sum::<usize>()
            + req
                .system
                .as_deref()
                .map(|s| s.split_whitespace().count())
                .unwrap_or(0);
        let output_words = response.text.split_whitespace().count().max(1);
        TokenUsage {
            input_tokens: input_words as u32,
            output_tokens: output_words as u32,
        }
    }

    fn build_response(&self, req: &PredictionRequest) -> Result<(MockResponse, PredictionResponse)> {
        let scripted = self.next_response(req);
        if let Some((class, message)) = &scripted.error {
            return Err(Error::Provider {
                provider: self.id.clone(),
                class: *class,
                message: message.clone(),
            });
        }

        let usage = Self::usage_for(req, &scripted);
        let cost = pricing::cost_for(&self.model, &usage, None);
        let message = if scripted.tool_calls.is_empty() {
            Message::assistant(scripted.text.clone())
        } else {
            Message::assistant_tool_calls(scripted.text.clone(), scripted.tool_calls.clone())
        };

        let response = PredictionResponse {
            message,
            finish_reason: scripted.finish_reason,
            usage,
            cost,
            model: self.model.clone(),
        };
        Ok((scripted, response))
    }
}

#[async_trait::async_trait]
impl Provider for MockProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn predict(&self, req: PredictionRequest) -> Result<PredictionResponse> {
        let (_, response) = self.build_response(&req)?;
        Ok(response)
    }

    fn cost(&self, usage: &TokenUsage) -> pk_domain::cost::CostInfo {
        pricing::cost_for(&self.model, usage, None)
    }

    async fn predict_stream(
        &self,
        req: PredictionRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let (scripted, response) = self.build_response(&req)?;

        // Stream word-by-word so chunk interceptors see realistic deltas.
        let words: Vec<String> = scripted
            .text
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let tool_calls = scripted.tool_calls.clone();
        let usage = response.usage;
        let finish_reason = response.finish_reason;

        let stream = async_stream::stream! {
            for word in words {
                yield Ok(StreamChunk::TextDelta { text: word });
            }
            for call in tool_calls {
                yield Ok(StreamChunk::ToolCallDelta {
                    id: call.id.clone(),
                    name: Some(call.name.clone()),
                    args_delta: call.args.to_string(),
                });
                yield Ok(StreamChunk::ToolCallComplete { call });
            }
            yield Ok(StreamChunk::Usage { usage });
            yield Ok(StreamChunk::Done { finish_reason });
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn req(scenario: &str, turn: usize) -> PredictionRequest {
        PredictionRequest {
            messages: vec![Message::user("hello there")],
            scenario_id: Some(scenario.to_string()),
            turn_index: Some(turn),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn keyed_script_wins_over_default() {
        let mock = MockProvider::new("mock")
            .script("s1", 0, MockResponse::text("Hello!"))
            .with_default(MockResponse::text("default"));

        let first = mock.predict(req("s1", 0)).await.unwrap();
        assert_eq!(first.message.get_content(), "Hello!");

        // Key exhausted -> default.
        let second = mock.predict(req("s1", 0)).await.unwrap();
        assert_eq!(second.message.get_content(), "default");
    }

    #[tokio::test]
    async fn defaults_rotate() {
        let mock = MockProvider::new("mock")
            .with_default(MockResponse::text("a"))
            .with_default(MockResponse::text("b"));
        assert_eq!(
            mock.predict(req("x", 0)).await.unwrap().message.get_content(),
            "a"
        );
        assert_eq!(
            mock.predict(req("x", 1)).await.unwrap().message.get_content(),
            "b"
        );
        assert_eq!(
            mock.predict(req("x", 2)).await.unwrap().message.get_content(),
            "a"
        );
    }

    #[tokio::test]
    async fn tool_call_script_sets_finish_reason() {
        let mock = MockProvider::new("mock").script(
            "s1",
            0,
            MockResponse::tool_call("get_order_status", serde_json::json!({"id": 42})),
        );
        let resp = mock.predict(req("s1", 0)).await.unwrap();
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
        assert_eq!(resp.message.tool_calls.len(), 1);
        assert_eq!(resp.message.tool_calls[0].name, "get_order_status");
    }

    #[tokio::test]
    async fn scripted_error_surfaces_class() {
        let mock = MockProvider::new("mock").script(
            "s1",
            0,
            MockResponse::error(ErrorClass::RateLimit, "429"),
        );
        let err = mock.predict(req("s1", 0)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn stream_ends_with_done_after_tool_calls() {
        let mock = MockProvider::new("mock").script(
            "s1",
            0,
            MockResponse::tool_call("lookup", serde_json::json!({})),
        );
        let mut stream = mock.predict_stream(req("s1", 0)).await.unwrap();
        let mut kinds = Vec::new();
        while let Some(chunk) = stream.next().await {
            kinds.push(chunk.unwrap());
        }
        assert!(matches!(kinds.last(), Some(StreamChunk::Done { .. })));
        let complete_idx = kinds
            .iter()
            .position(|c| matches!(c, StreamChunk::ToolCallComplete { .. }))
            .unwrap();
        let done_idx = kinds.len() - 1;
        assert!(complete_idx < done_idx);
    }

    #[tokio::test]
    async fn streamed_text_reassembles() {
        let mock = MockProvider::new("mock").script(
            "s1",
            0,
            MockResponse::text("You should not do that"),
        );
        let mut stream = mock.predict_stream(req("s1", 0)).await.unwrap();
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            if let StreamChunk::TextDelta { text: t } = chunk.unwrap() {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "You should not do that");
    }

    #[tokio::test]
    async fn usage_is_deterministic() {
        let mock = MockProvider::new("mock").with_default(MockResponse::text("four words right here"));
        let a = mock.predict(req("s", 0)).await.unwrap().usage;
        let b = mock.predict(req("s", 0)).await.unwrap().usage;
        assert_eq!(a, b);
        assert!(a.output_tokens > 0);
    }
}
