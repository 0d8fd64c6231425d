//! The conversation runner: walks a scenario's turns against one provider,
//! driving the pipeline for every assistant exchange.
//!
//! Handles scripted user/assistant turns, self-play user turns via a
//! secondary simulator provider, the tool-call loop, streaming with
//! mid-stream guardrail aborts, retry with backoff, and the per-call /
//! per-turn / per-run timeout ladder. Seals exactly one [`RunResult`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pk_assertions::{AssertionRegistry, Subject};
use pk_context::TokenEstimator;
use pk_domain::clock::Clock;
use pk_domain::config::{
    ContextPolicy, RequestDefaults, RetryPolicy, ScenarioSpec, TimeoutConfig, TurnRole, TurnSpec,
};
use pk_domain::events::ArenaEvent;
use pk_domain::message::{Message, Role};
use pk_domain::result::RunResult;
use pk_domain::stream::FinishReason;
use pk_domain::validation::{AssertionsSummary, ValidationError};
use pk_domain::{Error, Result};
use pk_hooks::HookRegistry;
use pk_providers::retry::backoff_delay;
use pk_providers::{PredictionRequest, PredictionResponse, Provider};
use pk_tools::ToolRegistry;

use crate::bus::EventBus;
use crate::cancel::CancelToken;
use crate::pipeline::{
    ContextMiddleware, ExecutionContext, InputGuard, Middleware, Pipeline, ProviderStage,
    TemplateMiddleware, TurnValidator,
};

const SIMULATOR_SYSTEM_PROMPT: &str = "You are role-playing as the USER in a conversation \
with an AI assistant. Stay in character and reply with only the user's next message, \
no commentary.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration & setup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub streaming: bool,
    pub max_tool_calls: u32,
    pub max_input_chars: Option<usize>,
    pub timeouts: TimeoutConfig,
    pub retry: RetryPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            max_tool_calls: 8,
            max_input_chars: None,
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything specific to one run of one matrix cell.
pub struct RunSetup {
    pub run_id: String,
    pub region: Option<String>,
    pub system_prompt: Option<String>,
    pub vars: BTreeMap<String, String>,
    pub context_policy: Option<ContextPolicy>,
    pub request_defaults: RequestDefaults,
    pub cancel: CancelToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConversationRunner {
    pub provider: Arc<dyn Provider>,
    /// Secondary provider generating self-play user turns.
    pub simulator: Option<Arc<dyn Provider>>,
    pub tools: ToolRegistry,
    pub hooks: HookRegistry,
    pub assertions: AssertionRegistry,
    pub estimator: Arc<dyn TokenEstimator>,
    pub clock: Arc<dyn Clock>,
    pub bus: EventBus,
    pub config: RunnerConfig,
}

/// Outcome of one assistant exchange (provider calls + tool loop).
struct TurnOutcome {
    /// Fatal error that seals the run, if any.
    error: Option<Error>,
}

impl ConversationRunner {
    fn pipeline(&self, setup: &RunSetup, scenario: &ScenarioSpec) -> Pipeline {
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(TemplateMiddleware),
            Arc::new(ContextMiddleware {
                policy: scenario.context_policy.or(setup.context_policy),
                estimator: self.estimator.clone(),
            }),
            Arc::new(InputGuard {
                max_input_chars: self.config.max_input_chars,
            }),
            Arc::new(TurnValidator),
        ];
        Pipeline::new(
            middlewares,
            Arc::new(ProviderStage {
                provider: self.provider.clone(),
                hooks: self.hooks.clone(),
                bus: self.bus.clone(),
                clock: self.clock.clone(),
                call_timeout: Duration::from_secs(self.config.timeouts.provider_call_secs),
            }),
        )
    }

    /// Execute the scenario to completion (or failure) and seal the result.
    pub async fn run(&self, scenario: &ScenarioSpec, setup: RunSetup) -> RunResult {
        let started = self.clock.now();
        let mut result = RunResult::new(
            setup.run_id.clone(),
            scenario.id.clone(),
            self.provider.id().to_string(),
            setup.region.clone(),
        );

        self.bus.emit(ArenaEvent::RunStarted {
            run_id: setup.run_id.clone(),
            scenario_id: scenario.id.clone(),
            provider_id: self.provider.id().to_string(),
            region: setup.region.clone(),
        });

        let run_timeout = Duration::from_secs(self.config.timeouts.run_secs);
        let outcome =
            tokio::time::timeout(run_timeout, self.run_turns(scenario, &setup, &mut result)).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => result.error = Some(e.to_string()),
            Err(_) => {
                result.error = Some(
                    Error::Timeout(format!("run exceeded {}s", run_timeout.as_secs())).to_string(),
                )
            }
        }

        // Conversation assertions run against whatever history exists, even
        // after a mid-run failure.
        if !scenario.conversation_assertions.is_empty() {
            match self.assertions.build_all(&scenario.conversation_assertions) {
                Ok(assertions) => {
                    let mut results = Vec::with_capacity(assertions.len());
                    for assertion in assertions {
                        results
                            .push(assertion.check(Subject::Conversation(&result.messages)).await);
                    }
                    result.conversation_assertions =
                        Some(AssertionsSummary::from_results(results));
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to build conversation assertions");
                    if result.error.is_none() {
                        result.error = Some(e.to_string());
                    }
                }
            }
        }

        result.duration = (self.clock.now() - started)
            .to_std()
            .unwrap_or(Duration::ZERO);

        match &result.error {
            Some(error) => self.bus.emit(ArenaEvent::RunFailed {
                run_id: result.run_id.clone(),
                error: error.clone(),
            }),
            None => self.bus.emit(ArenaEvent::RunCompleted {
                run_id: result.run_id.clone(),
                passed: result.passed(),
            }),
        }

        result
    }

    async fn run_turns(
        &self,
        scenario: &ScenarioSpec,
        setup: &RunSetup,
        result: &mut RunResult,
    ) -> Result<()> {
        // Duplex scenarios need a duplex-capable provider; fail before any
        // network I/O.
        if scenario.duplex && !self.provider.capabilities().supports_duplex {
            return Err(Error::Unsupported {
                provider: self.provider.id().to_string(),
                feature: pk_domain::capability::Feature::Duplex,
            });
        }

        let pipeline = self.pipeline(setup, scenario);

        for (turn_index, turn) in scenario.turns.iter().enumerate() {
            if setup.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            self.bus.emit(ArenaEvent::TurnStarted {
                run_id: setup.run_id.clone(),
                turn_index,
                role: match turn.role {
                    TurnRole::Assistant => Role::Assistant,
                    _ => Role::User,
                },
            });

            let turn_timeout = Duration::from_secs(self.config.timeouts.turn_secs);
            let outcome = tokio::time::timeout(
                turn_timeout,
                self.run_turn(scenario, setup, &pipeline, turn, turn_index, result),
            )
            .await;

            let outcome = match outcome {
                Ok(outcome) => outcome?,
                Err(_) => {
                    return Err(Error::Timeout(format!(
                        "turn {turn_index} exceeded {}s",
                        turn_timeout.as_secs()
                    )))
                }
            };
            if let Some(error) = outcome.error {
                return Err(error);
            }
        }
        Ok(())
    }

    async fn run_turn(
        &self,
        scenario: &ScenarioSpec,
        setup: &RunSetup,
        pipeline: &Pipeline,
        turn: &TurnSpec,
        turn_index: usize,
        result: &mut RunResult,
    ) -> Result<TurnOutcome> {
        match turn.role {
            TurnRole::Assistant => {
                // Scripted assistant fixture: append verbatim, assert.
                let mut message = scripted_message(Role::Assistant, turn);
                self.assert_turn(turn, turn_index, &mut message, result).await?;
                result.messages.push(message);
                self.emit_turn_completed(setup, turn_index, 0);
                Ok(TurnOutcome { error: None })
            }
            TurnRole::User => {
                result.messages.push(scripted_message(Role::User, turn));
                self.assistant_exchange(scenario, setup, pipeline, turn, turn_index, result)
                    .await
            }
            TurnRole::SelfplayUser | TurnRole::GeminiUser => {
                let repetitions = turn.turns.unwrap_or(1).max(1);
                for _ in 0..repetitions {
                    if setup.cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    let user_message = self
                        .generate_selfplay_turn(turn, &result.messages)
                        .await?;
                    result.messages.push(user_message);
                    let outcome = self
                        .assistant_exchange(scenario, setup, pipeline, turn, turn_index, result)
                        .await?;
                    if outcome.error.is_some() {
                        return Ok(outcome);
                    }
                }
                Ok(TurnOutcome { error: None })
            }
        }
    }

    /// Drive the provider (and its tool loop) until the turn produces a
    /// final assistant message.
    async fn assistant_exchange(
        &self,
        scenario: &ScenarioSpec,
        setup: &RunSetup,
        pipeline: &Pipeline,
        turn: &TurnSpec,
        turn_index: usize,
        result: &mut RunResult,
    ) -> Result<TurnOutcome> {
        let allowed_tools = turn
            .tool_constraints
            .as_ref()
            .filter(|c| !c.allowed.is_empty())
            .map(|c| c.allowed.clone());
        let max_tool_calls = turn
            .tool_constraints
            .as_ref()
            .and_then(|c| c.max_calls)
            .unwrap_or(self.config.max_tool_calls)
            .min(self.config.max_tool_calls);

        let mut tool_calls_made = 0u32;
        // Messages appended from here on belong to this turn's exchange.
        let exchange_start = result.messages.len();

        loop {
            let request = PredictionRequest {
                system: setup.system_prompt.clone(),
                messages: result.messages.clone(),
                temperature: setup.request_defaults.temperature,
                max_tokens: setup.request_defaults.max_tokens,
                tools: self.tools.definitions(allowed_tools.as_deref()),
                wants_media: result.messages.iter().any(Message::has_media),
                cache_system_prompt: false,
                scenario_id: Some(scenario.id.clone()),
                turn_index: Some(turn_index),
            };

            let turn_scope = result.messages[exchange_start..].to_vec();
            let (response, ctx) = match self
                .invoke_with_retry(scenario, setup, pipeline, turn, turn_index, request, turn_scope)
                .await
            {
                Ok(pair) => pair,
                Err((error, ctx)) => {
                    // A mid-stream guardrail abort preserves the accepted
                    // prefix as the turn's assistant message.
                    if let (Error::HookDenied { .. }, Some(partial)) =
                        (&error, ctx.as_ref().and_then(|c| c.partial_text.clone()))
                    {
                        let mut message = Message::assistant(partial);
                        if let Some(ctx) = &ctx {
                            attach_metadata(&mut message, ctx);
                        }
                        result.messages.push(message);
                    }
                    return Ok(TurnOutcome { error: Some(error) });
                }
            };

            let mut message = response.message.clone();
            message.latency_ms = ctx.latency_ms;
            message.cost_info = Some(response.cost);
            attach_metadata(&mut message, &ctx);
            result.cost.add(&response.cost);

            let is_tool_round = response.finish_reason == FinishReason::ToolCalls
                && !message.tool_calls.is_empty();

            if !is_tool_round {
                collect_violations(&message, turn_index, result);
                result.messages.push(message);
                self.emit_turn_completed(setup, turn_index, ctx.latency_ms);
                return Ok(TurnOutcome { error: None });
            }

            // ── Tool dispatch round ─────────────────────────────────
            let calls = message.tool_calls.clone();
            result.messages.push(message);

            for call in &calls {
                if setup.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                if tool_calls_made >= max_tool_calls {
                    return Ok(TurnOutcome {
                        error: Some(Error::ToolLoop {
                            calls: tool_calls_made,
                        }),
                    });
                }
                tool_calls_made += 1;

                let tool_started = self.clock.now();
                let tool_result = match self.tools.dispatch(call).await {
                    Ok(tool_result) => tool_result,
                    Err(e) => {
                        // Transport-level tool failure is fatal for the turn.
                        return Ok(TurnOutcome { error: Some(e) });
                    }
                };
                let tool_ms =
                    (self.clock.now() - tool_started).num_milliseconds().max(0) as u64;
                let is_error = tool_result.error.is_some();

                result.tool_stats.record(&call.name, is_error);
                self.bus.emit(ArenaEvent::ToolInvoked {
                    run_id: setup.run_id.clone(),
                    turn_index,
                    name: call.name.clone(),
                    duration_ms: tool_ms,
                    is_error,
                });
                result.messages.push(Message::tool(tool_result));
            }
            // Loop: re-invoke the provider with the tool results appended.
        }
    }

    /// One pipeline invocation with class-gated retry. Returns the context
    /// alongside the response (or error) so the caller can read latency,
    /// truncation metadata, and partial text.
    #[allow(clippy::too_many_arguments)]
    async fn invoke_with_retry(
        &self,
        scenario: &ScenarioSpec,
        setup: &RunSetup,
        pipeline: &Pipeline,
        turn: &TurnSpec,
        turn_index: usize,
        request: PredictionRequest,
        turn_scope: Vec<Message>,
    ) -> std::result::Result<
        (PredictionResponse, ExecutionContext),
        (Error, Option<ExecutionContext>),
    > {
        let turn_assertions = match self.assertions.build_all(&turn.assertions) {
            Ok(assertions) => assertions,
            Err(e) => return Err((e, None)),
        };

        let mut attempt = 0u32;
        loop {
            let mut ctx = ExecutionContext::new(
                setup.run_id.clone(),
                scenario.id.clone(),
                turn_index,
                self.config.streaming,
                setup.vars.clone(),
                setup.cancel.child(),
            );
            ctx.turn_assertions = turn_assertions.clone();
            ctx.turn_scope = turn_scope.clone();

            match pipeline.execute(&mut ctx, request.clone()).await {
                Ok(response) => return Ok((response, ctx)),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.retry.max_attempts => {
                    let delay = backoff_delay(&self.config.retry, attempt);
                    tracing::warn!(
                        run_id = %setup.run_id,
                        turn_index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, Some(ctx))),
            }
        }
    }

    /// Generate one self-play user utterance from the persona and the
    /// conversation so far.
    async fn generate_selfplay_turn(
        &self,
        turn: &TurnSpec,
        history: &[Message],
    ) -> Result<Message> {
        let simulator = self.simulator.as_ref().ok_or_else(|| {
            Error::Config("scenario has self-play turns but no user simulator provider".into())
        })?;

        let transcript = history
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                    _ => "user",
                };
                format!("{role}: {}", m.get_content())
            })
            .collect::<Vec<_>>()
            .join("\n");
        let persona = turn.persona.as_deref().unwrap_or("an ordinary user");
        let prompt = if transcript.is_empty() {
            format!("Persona: {persona}\n\nOpen the conversation as this user.")
        } else {
            format!(
                "Persona: {persona}\n\nConversation so far:\n{transcript}\n\nReply as this user."
            )
        };

        let request = PredictionRequest {
            system: Some(SIMULATOR_SYSTEM_PROMPT.to_string()),
            messages: vec![Message::user(prompt)],
            ..Default::default()
        };
        let response = simulator.predict(request).await?;
        Ok(Message::user(response.message.get_content()))
    }

    /// Run a scripted turn's assertions directly (no provider call).
    async fn assert_turn(
        &self,
        turn: &TurnSpec,
        turn_index: usize,
        message: &mut Message,
        result: &mut RunResult,
    ) -> Result<()> {
        let mut checked = Vec::new();
        for assertion in self.assertions.build_all(&turn.assertions)? {
            checked.push(assertion.check(Subject::turn(message)).await);
        }
        message.validations.extend(checked);
        collect_violations(message, turn_index, result);
        Ok(())
    }

    fn emit_turn_completed(&self, setup: &RunSetup, turn_index: usize, latency_ms: u64) {
        self.bus.emit(ArenaEvent::TurnCompleted {
            run_id: setup.run_id.clone(),
            turn_index,
            latency_ms,
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn scripted_message(role: Role, turn: &TurnSpec) -> Message {
    if !turn.parts.is_empty() {
        Message::with_parts(role, turn.parts.clone())
    } else {
        let content = turn.content.clone().unwrap_or_default();
        match role {
            Role::Assistant => Message::assistant(content),
            _ => Message::user(content),
        }
    }
}

/// Copy context-middleware records onto the message metadata.
fn attach_metadata(message: &mut Message, ctx: &ExecutionContext) {
    for (key, value) in &ctx.metadata {
        message.meta.insert(key.clone(), value.clone());
    }
}

/// Record failed turn assertions on the run.
fn collect_violations(message: &Message, turn_index: usize, result: &mut RunResult) {
    for validation in message.validations.iter().filter(|v| !v.passed) {
        result.violations.push(ValidationError {
            turn_index: Some(turn_index),
            assertion: validation.kind.clone(),
            message: validation.message.clone(),
        });
    }
}
