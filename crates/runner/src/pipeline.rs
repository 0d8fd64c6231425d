//! The request pipeline: an ordered middleware chain whose terminal stage
//! calls the provider.
//!
//! Canonical order, outermost in: template -> context -> input guard ->
//! turn validator -> provider. Ordering is contractual: context truncation
//! happens before the provider sees the request, hooks observe the exact
//! payload on the wire, and turn assertions run on the authoritative
//! response message.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use pk_assertions::{Assertion, Subject};
use pk_context::{enforce_budget, TokenEstimator};
use pk_domain::clock::Clock;
use pk_domain::config::{ContextPolicy, ContextStrategy};
use pk_domain::cost::TokenUsage;
use pk_domain::events::ArenaEvent;
use pk_domain::message::{Message, Role, ToolCall};
use pk_domain::stream::{FinishReason, StreamChunk};
use pk_domain::{Error, Result};
use pk_hooks::HookRegistry;
use pk_providers::traits::check_request;
use pk_providers::{PredictionRequest, PredictionResponse, Provider};

use crate::bus::EventBus;
use crate::cancel::CancelToken;
use crate::template;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-invocation state threaded through the chain. One provider call gets
/// one context; the runner reads the recorded latency, truncation metadata,
/// and (on a streaming abort) the partial text back out of it.
pub struct ExecutionContext {
    pub run_id: String,
    pub scenario_id: String,
    pub turn_index: usize,
    pub streaming: bool,
    pub vars: BTreeMap<String, String>,
    pub cancel: CancelToken,
    /// Truncation records, strategy-fallback warnings, and anything else a
    /// stage wants to surface on the run.
    pub metadata: BTreeMap<String, Value>,
    /// Assertions for the turn this call completes.
    pub turn_assertions: Vec<Arc<dyn Assertion>>,
    /// Messages appended earlier in the same turn (tool-call rounds), so
    /// tool-usage assertions see the whole turn.
    pub turn_scope: Vec<Message>,
    /// Wall time of the provider call, recorded by the terminal stage.
    pub latency_ms: u64,
    /// Text accumulated before a mid-stream hook denial.
    pub partial_text: Option<String>,
}

impl ExecutionContext {
    pub fn new(
        run_id: impl Into<String>,
        scenario_id: impl Into<String>,
        turn_index: usize,
        streaming: bool,
        vars: BTreeMap<String, String>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            scenario_id: scenario_id.into(),
            turn_index,
            streaming,
            vars,
            cancel,
            metadata: BTreeMap::new(),
            turn_assertions: Vec::new(),
            turn_scope: Vec::new(),
            latency_ms: 0,
            partial_text: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One stage of the chain. A middleware may inspect or rewrite the request,
/// call `next`, and inspect or rewrite the response on the way back out.
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        ctx: &mut ExecutionContext,
        req: PredictionRequest,
        next: Next<'_>,
    ) -> Result<PredictionResponse>;
}

/// The terminal stage that actually talks to a provider.
#[async_trait::async_trait]
pub trait Terminal: Send + Sync {
    async fn call(
        &self,
        ctx: &mut ExecutionContext,
        req: PredictionRequest,
    ) -> Result<PredictionResponse>;
}

/// Continuation handed to each middleware.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    pub async fn run(
        self,
        ctx: &mut ExecutionContext,
        req: PredictionRequest,
    ) -> Result<PredictionResponse> {
        match self.rest.split_first() {
            Some((middleware, rest)) => {
                middleware
                    .handle(
                        ctx,
                        req,
                        Next {
                            rest,
                            terminal: self.terminal,
                        },
                    )
                    .await
            }
            None => self.terminal.call(ctx, req).await,
        }
    }
}

/// The assembled chain.
pub struct Pipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn Terminal>,
}

impl Pipeline {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>, terminal: Arc<dyn Terminal>) -> Self {
        Self {
            middlewares,
            terminal,
        }
    }

    pub async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        req: PredictionRequest,
    ) -> Result<PredictionResponse> {
        Next {
            rest: &self.middlewares,
            terminal: self.terminal.as_ref(),
        }
        .run(ctx, req)
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Template middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Substitutes `{{var}}` placeholders in the system prompt from the
/// resolved variable map.
pub struct TemplateMiddleware;

#[async_trait::async_trait]
impl Middleware for TemplateMiddleware {
    async fn handle(
        &self,
        ctx: &mut ExecutionContext,
        mut req: PredictionRequest,
        next: Next<'_>,
    ) -> Result<PredictionResponse> {
        if let Some(system) = req.system.take() {
            let (expanded, unknown) = template::expand(&system, &ctx.vars);
            if !unknown.is_empty() {
                tracing::debug!(placeholders = ?unknown, "unresolved template placeholders");
            }
            req.system = Some(expanded);
        }
        next.run(ctx, req).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn strategy_name(strategy: ContextStrategy) -> &'static str {
    match strategy {
        ContextStrategy::Oldest => "oldest",
        ContextStrategy::Fail => "fail",
        ContextStrategy::Summarize => "summarize",
        ContextStrategy::Relevance => "relevance",
    }
}

/// Enforces the context policy before the provider sees the request.
pub struct ContextMiddleware {
    pub policy: Option<ContextPolicy>,
    pub estimator: Arc<dyn TokenEstimator>,
}

#[async_trait::async_trait]
impl Middleware for ContextMiddleware {
    async fn handle(
        &self,
        ctx: &mut ExecutionContext,
        mut req: PredictionRequest,
        next: Next<'_>,
    ) -> Result<PredictionResponse> {
        if let Some(policy) = &self.policy {
            let system = req.system.clone().unwrap_or_default();
            let messages = std::mem::take(&mut req.messages);
            let outcome =
                enforce_budget(policy, self.estimator.as_ref(), &system, messages)?;

            ctx.metadata
                .insert("context_truncated".into(), json!(outcome.truncated));
            ctx.metadata.insert(
                "context_original_count".into(),
                json!(outcome.original_count),
            );
            ctx.metadata
                .insert("context_truncated_count".into(), json!(outcome.kept_count));
            ctx.metadata
                .insert("context_dropped_count".into(), json!(outcome.dropped_count));
            if let Some(from) = outcome.fallback_from {
                ctx.metadata.insert(
                    "context_strategy_fallback".into(),
                    json!(format!("{} -> oldest", strategy_name(from))),
                );
            }

            req.messages = outcome.messages;
            req.cache_system_prompt = policy.cache_breakpoints;
        }
        next.run(ctx, req).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input guard (pre-validator)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Optional checks on the outgoing user input, before any provider I/O.
pub struct InputGuard {
    pub max_input_chars: Option<usize>,
}

#[async_trait::async_trait]
impl Middleware for InputGuard {
    async fn handle(
        &self,
        ctx: &mut ExecutionContext,
        req: PredictionRequest,
        next: Next<'_>,
    ) -> Result<PredictionResponse> {
        if let Some(max) = self.max_input_chars {
            let last_user_len = req
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.get_content().chars().count())
                .unwrap_or(0);
            if last_user_len > max {
                return Err(Error::HookDenied {
                    hook: "input_guard".into(),
                    reason: format!("user input is {last_user_len} chars, max {max}"),
                });
            }
        }
        next.run(ctx, req).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn validator (post)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs the turn's assertions against the response message. Skipped while
/// the turn is still inside its tool loop — assertions apply to the message
/// that completes the turn.
pub struct TurnValidator;

#[async_trait::async_trait]
impl Middleware for TurnValidator {
    async fn handle(
        &self,
        ctx: &mut ExecutionContext,
        req: PredictionRequest,
        next: Next<'_>,
    ) -> Result<PredictionResponse> {
        let mut resp = next.run(ctx, req).await?;
        if resp.finish_reason == FinishReason::ToolCalls {
            return Ok(resp);
        }
        // Scope = this turn's earlier tool-call rounds + the completing
        // message, so tools_called sees calls resolved mid-turn.
        let mut scope = ctx.turn_scope.clone();
        scope.push(resp.message.clone());
        let mut results = Vec::with_capacity(ctx.turn_assertions.len());
        for assertion in ctx.turn_assertions.clone() {
            let subject = match scope.last() {
                Some(message) => Subject::turn_with_scope(message, &scope),
                None => Subject::turn(&resp.message),
            };
            results.push(assertion.check(subject).await);
        }
        resp.message.validations.extend(results);
        Ok(resp)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider stage (terminal)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The terminal stage: capability gate, before/after hooks, the provider
/// call itself (streaming or not), latency recording.
pub struct ProviderStage {
    pub provider: Arc<dyn Provider>,
    pub hooks: HookRegistry,
    pub bus: EventBus,
    pub clock: Arc<dyn Clock>,
    pub call_timeout: Duration,
}

impl ProviderStage {
    async fn consume_stream(
        &self,
        ctx: &mut ExecutionContext,
        req: &PredictionRequest,
    ) -> Result<PredictionResponse> {
        use futures_util::StreamExt;

        let mut stream = self.provider.predict_stream(req.clone()).await?;
        let mut text = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut finish_reason = FinishReason::Stop;

        while let Some(item) = stream.next().await {
            if ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let chunk = item?;

            // Interception happens before the chunk is appended or
            // forwarded: a denied chunk and everything after it are
            // discarded, so subscribers see exactly the accepted prefix.
            if let Some(denied) = self.hooks.intercept_chunk(&text, &chunk) {
                drop(stream);
                self.bus.emit(ArenaEvent::HookDenied {
                    run_id: ctx.run_id.clone(),
                    turn_index: ctx.turn_index,
                    hook: denied.hook.clone(),
                    reason: denied.reason.clone(),
                });
                ctx.partial_text = Some(text);
                return Err(Error::HookDenied {
                    hook: denied.hook,
                    reason: denied.reason,
                });
            }

            self.bus.emit(ArenaEvent::Chunk {
                run_id: ctx.run_id.clone(),
                turn_index: ctx.turn_index,
                chunk: chunk.clone(),
            });

            match chunk {
                StreamChunk::TextDelta { text: delta } => text.push_str(&delta),
                StreamChunk::ToolCallComplete { call } => tool_calls.push(call),
                StreamChunk::ToolCallDelta { .. } => {}
                StreamChunk::Usage { usage: u } => usage = u,
                StreamChunk::Done { finish_reason: reason } => finish_reason = reason,
                StreamChunk::Error { message } => {
                    return Err(Error::Provider {
                        provider: self.provider.id().to_string(),
                        class: pk_domain::ErrorClass::Transient,
                        message,
                    })
                }
            }
        }

        // Some providers only signal tool use through the chunks.
        if !tool_calls.is_empty() {
            finish_reason = FinishReason::ToolCalls;
        }
        let message = if tool_calls.is_empty() {
            Message::assistant(text)
        } else {
            Message::assistant_tool_calls(text, tool_calls)
        };

        Ok(PredictionResponse {
            message,
            finish_reason,
            cost: self.provider.cost(&usage),
            usage,
            model: String::new(),
        })
    }
}

#[async_trait::async_trait]
impl Terminal for ProviderStage {
    async fn call(
        &self,
        ctx: &mut ExecutionContext,
        req: PredictionRequest,
    ) -> Result<PredictionResponse> {
        check_request(self.provider.as_ref(), &req, ctx.streaming)?;
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some(denied) = self.hooks.run_before(&req).await {
            return Err(Error::HookDenied {
                hook: denied.hook,
                reason: denied.reason,
            });
        }

        let started = self.clock.now();
        let outcome = if ctx.streaming {
            tokio::time::timeout(self.call_timeout, self.consume_stream(ctx, &req)).await
        } else {
            tokio::time::timeout(self.call_timeout, self.provider.predict(req.clone())).await
        };
        ctx.latency_ms = (self.clock.now() - started).num_milliseconds().max(0) as u64;

        let resp = match outcome {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "provider call exceeded {}s",
                    self.call_timeout.as_secs()
                )))
            }
        };

        if let Some(denied) = self.hooks.run_after(&req, &resp).await {
            return Err(Error::HookDenied {
                hook: denied.hook,
                reason: denied.reason,
            });
        }

        Ok(resp)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use pk_domain::clock::FixedClock;
    use pk_hooks::BannedWordsHook;
    use pk_providers::{MockProvider, MockResponse};

    fn stage(provider: Arc<dyn Provider>, hooks: HookRegistry) -> Arc<ProviderStage> {
        Arc::new(ProviderStage {
            provider,
            hooks,
            bus: EventBus::default(),
            clock: Arc::new(FixedClock::at_epoch()),
            call_timeout: Duration::from_secs(60),
        })
    }

    fn ctx(streaming: bool) -> ExecutionContext {
        ExecutionContext::new(
            "run-0001",
            "s1",
            0,
            streaming,
            BTreeMap::new(),
            CancelToken::new(),
        )
    }

    fn req(text: &str) -> PredictionRequest {
        PredictionRequest {
            messages: vec![Message::user(text)],
            scenario_id: Some("s1".into()),
            turn_index: Some(0),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn template_expands_before_provider() {
        struct CaptureSystem;
        #[async_trait::async_trait]
        impl Terminal for CaptureSystem {
            async fn call(
                &self,
                _ctx: &mut ExecutionContext,
                req: PredictionRequest,
            ) -> Result<PredictionResponse> {
                Ok(PredictionResponse {
                    message: Message::assistant(req.system.unwrap_or_default()),
                    finish_reason: FinishReason::Stop,
                    usage: TokenUsage::default(),
                    cost: Default::default(),
                    model: "test".into(),
                })
            }
        }

        let pipeline = Pipeline::new(vec![Arc::new(TemplateMiddleware)], Arc::new(CaptureSystem));
        let mut ctx = ctx(false);
        ctx.vars.insert("product".into(), "Acme".into());

        let mut request = req("hi");
        request.system = Some("You support {{product}}.".into());
        let resp = pipeline.execute(&mut ctx, request).await.unwrap();
        assert_eq!(resp.message.get_content(), "You support Acme.");
    }

    #[tokio::test]
    async fn context_middleware_records_truncation_metadata() {
        let mock = Arc::new(MockProvider::new("mock").with_default(MockResponse::text("ok")));
        let pipeline = Pipeline::new(
            vec![Arc::new(ContextMiddleware {
                policy: Some(ContextPolicy {
                    token_budget: 20,
                    reserve_for_output: 0,
                    strategy: ContextStrategy::Oldest,
                    cache_breakpoints: false,
                }),
                estimator: Arc::new(pk_context::WordCountEstimator::default()),
            })],
            stage(mock, HookRegistry::new()),
        );

        let mut ctx = ctx(false);
        let mut request = req("latest");
        for i in 0..6 {
            request
                .messages
                .insert(0, Message::user(format!("older message number {i} with padding")));
        }
        pipeline.execute(&mut ctx, request).await.unwrap();
        assert_eq!(ctx.metadata["context_truncated"], json!(true));
        assert!(ctx.metadata["context_dropped_count"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn turn_validator_attaches_results_and_skips_tool_calls() {
        let mock = Arc::new(
            MockProvider::new("mock")
                .script("s1", 0, MockResponse::text("Hello!"))
                .script(
                    "s1",
                    1,
                    MockResponse::tool_call("lookup", json!({})),
                ),
        );
        let registry = pk_assertions::AssertionRegistry::builtin();
        let assertion = registry
            .build(
                &pk_domain::config::AssertionSpec::new("content_includes")
                    .with_param("patterns", json!(["hello"])),
            )
            .unwrap();

        let pipeline = Pipeline::new(
            vec![Arc::new(TurnValidator)],
            stage(mock, HookRegistry::new()),
        );

        let mut context = ctx(false);
        context.turn_assertions = vec![assertion.clone()];
        let resp = pipeline.execute(&mut context, req("hi")).await.unwrap();
        assert_eq!(resp.message.validations.len(), 1);
        assert!(resp.message.validations[0].passed);

        let mut context2 = ctx(false);
        context2.turn_index = 1;
        context2.turn_assertions = vec![assertion];
        let mut request = req("hi");
        request.turn_index = Some(1);
        let resp = pipeline.execute(&mut context2, request).await.unwrap();
        // Tool-call responses are not asserted mid-loop.
        assert!(resp.message.validations.is_empty());
    }

    #[tokio::test]
    async fn streaming_abort_preserves_prefix_and_discards_rest() {
        let mock = Arc::new(
            MockProvider::new("mock")
                .script("s1", 0, MockResponse::text("You should hack this")),
        );
        let hooks =
            HookRegistry::new().with(Arc::new(BannedWordsHook::new(vec!["hack".into()])));
        let provider_stage = stage(mock, hooks);

        let mut context = ctx(true);
        let err = provider_stage
            .call(&mut context, req("go"))
            .await
            .unwrap_err();
        match err {
            Error::HookDenied { hook, .. } => assert_eq!(hook, "banned_words"),
            other => panic!("unexpected error: {other}"),
        }
        // Prefix before the violating token is preserved.
        let partial = context.partial_text.unwrap();
        assert!(partial.starts_with("You should"));
        assert!(!partial.contains("hack"));
    }

    #[tokio::test]
    async fn input_guard_denies_oversized_input() {
        let mock = Arc::new(MockProvider::new("mock"));
        let pipeline = Pipeline::new(
            vec![Arc::new(InputGuard {
                max_input_chars: Some(5),
            })],
            stage(mock, HookRegistry::new()),
        );
        let mut context = ctx(false);
        let err = pipeline
            .execute(&mut context, req("way too long for the guard"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HookDenied { .. }));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let mock = Arc::new(MockProvider::new("mock"));
        let provider_stage = stage(mock, HookRegistry::new());
        let mut context = ctx(false);
        context.cancel.cancel();
        let err = provider_stage.call(&mut context, req("hi")).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
