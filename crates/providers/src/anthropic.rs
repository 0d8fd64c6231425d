//! Anthropic messages API adapter.
//!
//! Speaks the native `/v1/messages` contract: top-level system prompt (with
//! a cache-control breakpoint when requested), content blocks, `input_schema`
//! tools, and the event-typed SSE stream.

use serde_json::{json, Value};

use pk_domain::capability::ProviderCapabilities;
use pk_domain::config::{CredentialSpec, Platform, PricingSpec, ProviderSpec};
use pk_domain::cost::TokenUsage;
use pk_domain::message::{ContentPart, MediaSource, Message, Role, ToolCall};
use pk_domain::stream::{BoxStream, FinishReason, StreamChunk};
use pk_domain::{Error, Result};

use crate::credentials;
use crate::pricing;
use crate::sse::sse_chunk_stream;
use crate::traits::{PredictionRequest, PredictionResponse, Provider};
use crate::util::{from_reqwest, provider_error};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    model: String,
    credential: CredentialSpec,
    pricing_override: Option<PricingSpec>,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_spec(spec: &ProviderSpec) -> Result<Self> {
        // Bedrock/Vertex routing needs the vendor SDK auth chains, which are
        // external collaborators; only direct API access is wired in here.
        if !matches!(spec.platform(), Platform::Direct) {
            return Err(Error::Config(format!(
                "provider {:?}: platform {:?} is not supported for anthropic, use direct",
                spec.id,
                spec.platform()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        let credential = if spec.credential.is_empty() {
            CredentialSpec::from_env("ANTHROPIC_API_KEY")
        } else {
            spec.credential.clone()
        };

        Ok(Self {
            id: spec.id.clone(),
            base_url: spec
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: spec.model.clone(),
            credential,
            pricing_override: spec.pricing,
            capabilities: ProviderCapabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_vision: true,
                supports_audio: false,
                supports_duplex: false,
            },
            client,
        })
    }

    fn authed_post(&self) -> Result<reqwest::RequestBuilder> {
        let key = credentials::resolve(&self.credential)?;
        Ok(self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json"))
    }

    fn build_body(&self, req: &PredictionRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_anthropic).collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if let Some(system) = &req.system {
            body["system"] = if req.cache_system_prompt {
                json!([{
                    "type": "text",
                    "text": system,
                    "cache_control": {"type": "ephemeral"},
                }])
            } else {
                json!(system)
            };
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = json!(temperature);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|def| {
                    json!({
                        "name": def.name,
                        "description": def.description,
                        "input_schema": def.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire-format helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_anthropic(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => {
            let result = msg.tool_result.as_ref();
            json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": result.and_then(|r| r.call_id.clone()).unwrap_or_default(),
                    "content": msg.get_content(),
                    "is_error": result.map(|r| r.error.is_some()).unwrap_or(false),
                }],
            })
        }
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let mut blocks: Vec<Value> = Vec::new();
            let text = msg.get_content();
            if !text.is_empty() {
                blocks.push(json!({"type": "text", "text": text}));
            }
            for call in &msg.tool_calls {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.args,
                }));
            }
            json!({"role": "assistant", "content": blocks})
        }
        _ if msg.has_media() => {
            let blocks: Vec<Value> = msg
                .parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::Image { source, mime_type }
                    | ContentPart::Audio { source, mime_type }
                    | ContentPart::Video { source, mime_type }
                    | ContentPart::Document { source, mime_type } => match source {
                        MediaSource::Inline { data } => json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": mime_type.as_deref().unwrap_or("image/png"),
                                "data": data,
                            },
                        }),
                        MediaSource::Url { url } => json!({
                            "type": "image",
                            "source": {"type": "url", "url": url},
                        }),
                        MediaSource::File { path } => json!({
                            "type": "image",
                            "source": {"type": "url", "url": format!("file://{}", path.display())},
                        }),
                    },
                })
                .collect();
            json!({
                "role": if msg.role == Role::Assistant { "assistant" } else { "user" },
                "content": blocks,
            })
        }
        _ => json!({
            "role": if msg.role == Role::Assistant { "assistant" } else { "user" },
            "content": msg.get_content(),
        }),
    }
}

fn parse_stop_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn parse_usage(raw: &Value) -> TokenUsage {
    TokenUsage {
        input_tokens: raw.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        output_tokens: raw.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming parser state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracks the content block currently being streamed. Anthropic interleaves
/// `content_block_start` / `content_block_delta` / `content_block_stop`
/// events per block; tool-use blocks accumulate `input_json_delta` payloads.
#[derive(Default)]
struct StreamState {
    current_tool: Option<(String, String, String)>, // (id, name, args buffer)
    usage: TokenUsage,
    finish_reason: Option<FinishReason>,
}

impl StreamState {
    fn parse_event(&mut self, data: &str) -> Vec<Result<StreamChunk>> {
        let parsed: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                return vec![Ok(StreamChunk::Error {
                    message: format!("malformed SSE payload: {e}"),
                })]
            }
        };

        let mut out: Vec<Result<StreamChunk>> = Vec::new();
        match parsed.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(usage) = parsed.pointer("/message/usage") {
                    self.usage.input_tokens = parse_usage(usage).input_tokens;
                }
            }
            Some("content_block_start") => {
                if let Some(block) = parsed.get("content_block") {
                    if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                        self.current_tool = Some((
                            block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                            block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            String::new(),
                        ));
                    }
                }
            }
            Some("content_block_delta") => match parsed.pointer("/delta/type").and_then(Value::as_str) {
                Some("text_delta") => {
                    if let Some(text) = parsed.pointer("/delta/text").and_then(Value::as_str) {
                        out.push(Ok(StreamChunk::TextDelta { text: text.to_string() }));
                    }
                }
                Some("input_json_delta") => {
                    if let Some((id, name, args)) = &mut self.current_tool {
                        let delta = parsed
                            .pointer("/delta/partial_json")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        args.push_str(delta);
                        out.push(Ok(StreamChunk::ToolCallDelta {
                            id: id.clone(),
                            name: Some(name.clone()),
                            args_delta: delta.to_string(),
                        }));
                    }
                }
                _ => {}
            },
            Some("content_block_stop") => {
                if let Some((id, name, args_raw)) = self.current_tool.take() {
                    let args = if args_raw.trim().is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&args_raw).unwrap_or_else(|e| {
                            tracing::warn!(tool = %name, error = %e, "tool input is not valid JSON");
                            json!({})
                        })
                    };
                    out.push(Ok(StreamChunk::ToolCallComplete {
                        call: ToolCall { id, name, args },
                    }));
                }
            }
            Some("message_delta") => {
                if let Some(reason) = parsed.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    self.finish_reason = Some(parse_stop_reason(Some(reason)));
                }
                if let Some(usage) = parsed.get("usage") {
                    self.usage.output_tokens = parse_usage(usage).output_tokens;
                }
            }
            Some("message_stop") => {
                out.push(Ok(StreamChunk::Usage { usage: self.usage }));
                out.push(Ok(StreamChunk::Done {
                    finish_reason: self.finish_reason.unwrap_or(FinishReason::Stop),
                }));
            }
            Some("error") => {
                let message = parsed
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string();
                out.push(Ok(StreamChunk::Error { message }));
            }
            _ => {}
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn predict(&self, req: PredictionRequest) -> Result<PredictionResponse> {
        let body = self.build_body(&req, false);
        let response = self
            .authed_post()?
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(&self.id, status, &body));
        }

        let parsed: Value = response.json().await.map_err(from_reqwest)?;
        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        if let Some(blocks) = parsed.get("content").and_then(Value::as_array) {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        text.push_str(block.get("text").and_then(Value::as_str).unwrap_or(""));
                    }
                    Some("tool_use") => tool_calls.push(ToolCall {
                        id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        args: block.get("input").cloned().unwrap_or_else(|| json!({})),
                    }),
                    _ => {}
                }
            }
        }

        let finish_reason =
            parse_stop_reason(parsed.get("stop_reason").and_then(Value::as_str));
        let usage = parsed.get("usage").map(parse_usage).unwrap_or_default();
        let message = if tool_calls.is_empty() {
            Message::assistant(text)
        } else {
            Message::assistant_tool_calls(text, tool_calls)
        };

        Ok(PredictionResponse {
            message,
            finish_reason,
            cost: pricing::cost_for(&self.model, &usage, self.pricing_override.as_ref()),
            usage,
            model: parsed
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&self.model)
                .to_string(),
        })
    }

    fn cost(&self, usage: &TokenUsage) -> pk_domain::cost::CostInfo {
        pricing::cost_for(&self.model, usage, self.pricing_override.as_ref())
    }

    async fn predict_stream(
        &self,
        req: PredictionRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let body = self.build_body(&req, true);
        let response = self
            .authed_post()?
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(&self.id, status, &body));
        }

        let mut state = StreamState::default();
        Ok(sse_chunk_stream(response, move |data| state.parse_event(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pk_domain::config::CredentialSpec;

    fn spec() -> ProviderSpec {
        ProviderSpec {
            id: "claude".into(),
            kind: pk_domain::config::ProviderKind::Anthropic,
            model: "claude-sonnet-4-5".into(),
            region: None,
            regions: Vec::new(),
            platform: None,
            credential: CredentialSpec::from_env("ANTHROPIC_API_KEY"),
            defaults: Default::default(),
            base_url: None,
            pricing: None,
        }
    }

    #[test]
    fn cache_breakpoint_marks_system_block() {
        let provider = AnthropicProvider::from_spec(&spec()).unwrap();
        let req = PredictionRequest {
            system: Some("be helpful".into()),
            cache_system_prompt: true,
            ..Default::default()
        };
        let body = provider.build_body(&req, false);
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");

        let plain = provider.build_body(
            &PredictionRequest {
                system: Some("be helpful".into()),
                ..Default::default()
            },
            false,
        );
        assert_eq!(plain["system"], "be helpful");
    }

    #[test]
    fn bedrock_platform_is_rejected() {
        let mut s = spec();
        s.platform = Some(Platform::Bedrock);
        assert!(AnthropicProvider::from_spec(&s).is_err());
    }

    #[test]
    fn tool_result_becomes_user_block() {
        let msg = Message::tool(pk_domain::message::ToolResult {
            name: "lookup".into(),
            content: "shipped".into(),
            error: None,
            call_id: Some("toolu_1".into()),
        });
        let wire = msg_to_anthropic(&msg);
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn stream_assembles_tool_use_block() {
        let mut state = StreamState::default();
        state.parse_event(r#"{"type":"message_start","message":{"usage":{"input_tokens":12}}}"#);
        state.parse_event(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"lookup"}}"#,
        );
        state.parse_event(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"id\":42}"}}"#,
        );
        let stop = state.parse_event(r#"{"type":"content_block_stop","index":0}"#);
        let call = match stop[0].as_ref().unwrap() {
            StreamChunk::ToolCallComplete { call } => call.clone(),
            other => panic!("unexpected chunk: {other:?}"),
        };
        assert_eq!(call.id, "toolu_1");
        assert_eq!(call.args["id"], 42);

        state.parse_event(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":7}}"#,
        );
        let end = state.parse_event(r#"{"type":"message_stop"}"#);
        assert!(matches!(
            end[0].as_ref().unwrap(),
            StreamChunk::Usage { usage } if usage.input_tokens == 12 && usage.output_tokens == 7
        ));
        assert!(matches!(
            end[1].as_ref().unwrap(),
            StreamChunk::Done { finish_reason: FinishReason::ToolCalls }
        ));
    }
}
