//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, Gemini's
//! OpenAI-compatible surface, and any other endpoint following the chat
//! completions contract. Azure differs only in URL layout and auth header.

use std::collections::HashMap;

use serde_json::{json, Value};

use pk_domain::capability::ProviderCapabilities;
use pk_domain::config::{CredentialSpec, Platform, PricingSpec, ProviderKind, ProviderSpec};
use pk_domain::cost::TokenUsage;
use pk_domain::message::{ContentPart, MediaSource, Message, Role, ToolCall};
use pk_domain::stream::{BoxStream, FinishReason, StreamChunk};
use pk_domain::{Error, Result};
use pk_tools::ToolDefinition;

use crate::credentials;
use crate::pricing;
use crate::sse::sse_chunk_stream;
use crate::traits::{PredictionRequest, PredictionResponse, Provider};
use crate::util::{from_reqwest, provider_error};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_OPENAI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    model: String,
    credential: CredentialSpec,
    pricing_override: Option<PricingSpec>,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
    is_azure: bool,
}

impl OpenAiCompatProvider {
    pub fn from_spec(spec: &ProviderSpec) -> Result<Self> {
        let is_azure = spec.platform() == Platform::Azure;
        let base_url = match (&spec.base_url, spec.kind) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, ProviderKind::Openai) => OPENAI_BASE_URL.to_string(),
            (None, ProviderKind::Gemini) => GEMINI_OPENAI_BASE_URL.to_string(),
            (None, _) => {
                return Err(Error::Config(format!(
                    "provider {:?} requires base_url",
                    spec.id
                )))
            }
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        // Vendor-standard env vars apply when the spec names no credential.
        let credential = if spec.credential.is_empty() {
            match spec.kind {
                ProviderKind::Openai => CredentialSpec::from_env("OPENAI_API_KEY"),
                ProviderKind::Gemini => {
                    if std::env::var("GEMINI_API_KEY").is_ok() {
                        CredentialSpec::from_env("GEMINI_API_KEY")
                    } else {
                        CredentialSpec::from_env("GOOGLE_API_KEY")
                    }
                }
                _ => spec.credential.clone(),
            }
        } else {
            spec.credential.clone()
        };

        Ok(Self {
            id: spec.id.clone(),
            base_url,
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
            is_azure,
        })
    }

    fn chat_url(&self) -> String {
        if self.is_azure {
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version=2024-10-21",
                self.base_url, self.model
            )
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn authed_post(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        let key = credentials::resolve(&self.credential)?;
        let builder = self.client.post(url).header("Content-Type", "application/json");
        Ok(if self.is_azure {
            builder.header("api-key", key)
        } else {
            builder.header("Authorization", format!("Bearer {key}"))
        })
    }

    fn build_body(&self, req: &PredictionRequest, stream: bool) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(req.messages.iter().map(msg_to_openai));

        let mut body = json!({
            "messages": messages,
            "stream": stream,
        });
        // Azure embeds the deployment name in the URL.
        if !self.is_azure {
            body["model"] = Value::String(self.model.clone());
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_openai).collect());
        }
        if let Some(temperature) = req.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if stream {
            body["stream_options"] = json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire-format helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn media_url(source: &MediaSource, mime_type: Option<&str>) -> String {
    match source {
        MediaSource::Url { url } => url.clone(),
        MediaSource::Inline { data } => format!(
            "data:{};base64,{data}",
            mime_type.unwrap_or("application/octet-stream")
        ),
        MediaSource::File { path } => format!("file://{}", path.display()),
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => {
            let call_id = msg
                .tool_result
                .as_ref()
                .and_then(|r| r.call_id.clone())
                .unwrap_or_default();
            json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": msg.get_content(),
            })
        }
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let tool_calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|tc| {
                    json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.args.to_string(),
                        },
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": msg.get_content(),
                "tool_calls": tool_calls,
            })
        }
        _ if msg.has_media() => {
            let parts: Vec<Value> = msg
                .parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::Image { source, mime_type }
                    | ContentPart::Audio { source, mime_type }
                    | ContentPart::Video { source, mime_type }
                    | ContentPart::Document { source, mime_type } => json!({
                        "type": "image_url",
                        "image_url": {"url": media_url(source, mime_type.as_deref())},
                    }),
                })
                .collect();
            json!({"role": role_to_str(msg.role), "content": parts})
        }
        _ => json!({"role": role_to_str(msg.role), "content": msg.get_content()}),
    }
}

fn tool_to_openai(def: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        },
    })
}

fn parse_finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("length") => FinishReason::Length,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
    let function = raw.get("function")?;
    let args_raw = function.get("arguments").and_then(Value::as_str).unwrap_or("{}");
    let args = serde_json::from_str(args_raw).unwrap_or_else(|_| json!({}));
    Some(ToolCall {
        id: raw.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
        name: function.get("name").and_then(Value::as_str)?.to_string(),
        args,
    })
}

fn parse_usage(raw: &Value) -> TokenUsage {
    TokenUsage {
        input_tokens: raw.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        output_tokens: raw
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming parser state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assembles partial tool calls across delta events. OpenAI addresses
/// streaming tool calls by array index.
#[derive(Default)]
struct StreamState {
    tool_bufs: HashMap<u64, (String, String, String)>, // index -> (id, name, args)
    order: Vec<u64>,
    finish_reason: Option<FinishReason>,
}

impl StreamState {
    fn flush_tool_calls(&mut self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        for index in std::mem::take(&mut self.order) {
            if let Some((id, name, args_raw)) = self.tool_bufs.remove(&index) {
                let args = if args_raw.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&args_raw).unwrap_or_else(|e| {
                        tracing::warn!(tool = %name, error = %e, "tool call arguments are not valid JSON");
                        json!({})
                    })
                };
                chunks.push(StreamChunk::ToolCallComplete {
                    call: ToolCall { id, name, args },
                });
            }
        }
        chunks
    }

    fn parse_event(&mut self, data: &str) -> Vec<Result<StreamChunk>> {
        if data == "[DONE]" {
            let mut out: Vec<Result<StreamChunk>> =
                self.flush_tool_calls().into_iter().map(Ok).collect();
            out.push(Ok(StreamChunk::Done {
                finish_reason: self.finish_reason.unwrap_or(FinishReason::Stop),
            }));
            return out;
        }

        let parsed: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                return vec![Ok(StreamChunk::Error {
                    message: format!("malformed SSE payload: {e}"),
                })]
            }
        };

        let mut out: Vec<Result<StreamChunk>> = Vec::new();

        // Usage-only final chunk (stream_options.include_usage).
        if let Some(usage) = parsed.get("usage").filter(|u| !u.is_null()) {
            out.push(Ok(StreamChunk::Usage {
                usage: parse_usage(usage),
            }));
        }

        let Some(choice) = parsed.get("choices").and_then(|c| c.get(0)) else {
            return out;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    out.push(Ok(StreamChunk::TextDelta { text: text.to_string() }));
                }
            }
            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for tc in tool_calls {
                    let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let entry = self.tool_bufs.entry(index).or_insert_with(|| {
                        self.order.push(index);
                        (String::new(), String::new(), String::new())
                    });
                    if let Some(id) = tc.get("id").and_then(Value::as_str) {
                        entry.0 = id.to_string();
                    }
                    if let Some(function) = tc.get("function") {
                        if let Some(name) = function.get("name").and_then(Value::as_str) {
                            entry.1.push_str(name);
                        }
                        if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                            entry.2.push_str(args);
                            out.push(Ok(StreamChunk::ToolCallDelta {
                                id: entry.0.clone(),
                                name: Some(entry.1.clone()),
                                args_delta: args.to_string(),
                            }));
                        }
                    }
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(parse_finish_reason(Some(reason)));
            // Tool calls are complete once the finish reason arrives; the
            // terminal Done waits for [DONE] so usage can still land.
            out.extend(self.flush_tool_calls().into_iter().map(Ok));
        }

        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl Provider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn predict(&self, req: PredictionRequest) -> Result<PredictionResponse> {
        let body = self.build_body(&req, false);
        let response = self
            .authed_post(&self.chat_url())?
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
        let choice = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| Error::Http("response has no choices".into()))?;
        let raw_message = choice
            .get("message")
            .ok_or_else(|| Error::Http("choice has no message".into()))?;

        let text = raw_message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tool_calls: Vec<ToolCall> = raw_message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
            .unwrap_or_default();

        let finish_reason =
            parse_finish_reason(choice.get("finish_reason").and_then(Value::as_str));
        let usage = parsed
            .get("usage")
            .map(parse_usage)
            .unwrap_or_default();
        let model = parsed
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model)
            .to_string();

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
            model,
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
            .authed_post(&self.chat_url())?
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
