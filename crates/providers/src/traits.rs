use pk_domain::capability::{Feature, ProviderCapabilities};
use pk_domain::cost::{CostInfo, TokenUsage};
use pk_domain::message::Message;
use pk_domain::stream::{BoxStream, FinishReason, StreamChunk};
use pk_domain::{Error, Result};
use pk_tools::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic prediction request. Each call constructs its own
/// request; providers are shared read-only across runs.
#[derive(Debug, Clone, Default)]
pub struct PredictionRequest {
    /// System prompt, already template-expanded.
    pub system: Option<String>,
    /// The conversation history to send.
    pub messages: Vec<Message>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// The request carries media parts (requires vision/audio capability).
    pub wants_media: bool,
    /// Mark the system prompt as a prompt-cache breakpoint. Providers
    /// without cache support ignore the hint.
    pub cache_system_prompt: bool,
    /// Scenario identity, used by the mock provider to key scripted
    /// responses.
    pub scenario_id: Option<String>,
    pub turn_index: Option<usize>,
}

/// A provider-agnostic prediction response.
#[derive(Debug, Clone)]
pub struct PredictionResponse {
    /// The finalized assistant message (text and/or tool calls).
    pub message: Message,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    pub cost: CostInfo,
    /// The model that actually produced the response.
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// Implementations translate between the arena's internal types and each
/// back-end's wire format. Cancellation rides on the caller's task: dropping
/// the returned future or stream must abort the underlying request.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// A unique identifier for this provider instance.
    fn id(&self) -> &str;

    /// The advertised capabilities of this provider/model combination.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Send a prediction request and wait for the full response.
    async fn predict(&self, req: PredictionRequest) -> Result<PredictionResponse>;

    /// Send a prediction request and return a stream of chunks.
    /// `tool_call_complete` chunks precede `done`; `done` is always last.
    async fn predict_stream(
        &self,
        req: PredictionRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>>;

    /// Price the reported usage for this provider's model. Streaming
    /// consumers call this to turn the final `usage` chunk into a cost
    /// record.
    fn cost(&self, usage: &TokenUsage) -> CostInfo {
        CostInfo::from_usage(usage, 0.0, 0.0)
    }
}

/// Fail fast with [`Error::Unsupported`] when a request needs a feature the
/// provider does not advertise. Called before any network I/O.
pub fn check_request(
    provider: &dyn Provider,
    req: &PredictionRequest,
    streaming: bool,
) -> Result<()> {
    let caps = provider.capabilities();
    let mut needed: Vec<Feature> = Vec::new();
    if !req.tools.is_empty() {
        needed.push(Feature::Tools);
    }
    if streaming {
        needed.push(Feature::Streaming);
    }
    if req.wants_media {
        needed.push(Feature::Vision);
    }
    for feature in needed {
        if !caps.supports(feature) {
            return Err(Error::Unsupported {
                provider: provider.id().to_string(),
                feature,
            });
        }
    }
    Ok(())
}
