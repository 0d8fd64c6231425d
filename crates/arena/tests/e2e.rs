//! End-to-end suites driven through the scheduler with the mock provider
//! and a fixed clock, including the byte-determinism check on
//! `results.json`.

use std::collections::BTreeMap;
use std::sync::Arc;

use pk_arena::{LoadedSuite, Scheduler, SchedulerOptions, StateStore};
use pk_domain::clock::FixedClock;
use pk_domain::config::{ArenaDefaults, PromptConfig, ProviderSpec, ScenarioSpec};
use pk_domain::message::Role;
use pk_hooks::{BannedWordsHook, HookRegistry};
use pk_providers::{MockProvider, MockResponse, ProviderRegistry};
use pk_report::{JsonRepository, ResultRepository};
use pk_tools::{StaticTool, ToolRegistry};

fn provider_spec(id: &str) -> ProviderSpec {
    serde_yaml::from_str(&format!("id: {id}\ntype: mock\nmodel: mock-1\n")).unwrap()
}

fn suite(scenarios: Vec<ScenarioSpec>) -> LoadedSuite {
    LoadedSuite {
        name: "e2e".into(),
        vars: BTreeMap::new(),
        prompt_configs: vec![PromptConfig {
            name: "default".into(),
            system_prompt: "You are a support agent.".into(),
            variables: BTreeMap::new(),
        }],
        providers: vec![provider_spec("mock")],
        scenarios,
        defaults: ArenaDefaults::default(),
    }
}

fn scenario(yaml: &str) -> ScenarioSpec {
    serde_yaml::from_str(yaml).unwrap()
}

fn scheduler(suite: LoadedSuite, mock: MockProvider) -> Scheduler {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(mock));
    Scheduler::new(suite, registry, StateStore::ephemeral())
        .with_clock(Arc::new(FixedClock::at_epoch()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 1. Scripted single turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn scripted_single_turn_against_mock() {
    let mock = MockProvider::new("mock").script("greet", 0, MockResponse::text("Hello!"));
    let suite = suite(vec![scenario(
        "id: greet\nturns:\n  - role: user\n    content: Say hi\n",
    )]);

    let results = scheduler(suite, mock).run_all().await.unwrap();
    assert_eq!(results.len(), 1);
    let run = &results[0];
    assert!(run.error.is_none());
    assert_eq!(run.messages.len(), 2);
    assert_eq!(run.messages[1].get_content(), "Hello!");
    assert!(run.conversation_assertions.is_none());
    assert!(run.passed());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 2. Banned-words streaming abort
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn banned_words_abort_mid_stream() {
    let mock =
        MockProvider::new("mock").script("banned", 0, MockResponse::text("You should hack this"));
    let mut s = suite(vec![scenario(
        "id: banned\nturns:\n  - role: user\n    content: go\n",
    )]);
    s.defaults.streaming = true;

    let scheduler = scheduler(s, mock)
        .with_hooks(HookRegistry::new().with(Arc::new(BannedWordsHook::new(vec!["hack".into()]))));

    let results = scheduler.run_all().await.unwrap();
    let run = &results[0];
    let error = run.error.as_deref().expect("run should fail");
    assert!(error.contains("banned_words"), "error: {error}");
    // The appended assistant text is the prefix before the violating token.
    let assistant = run
        .messages
        .iter()
        .find(|m| m.role == Role::Assistant)
        .expect("partial assistant message");
    assert!(assistant.get_content().starts_with("You should"));
    assert!(!assistant.get_content().contains("hack"));
    assert!(!run.passed());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 3. Tool loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn tool_loop_with_assertion() {
    let mock = MockProvider::new("mock")
        .script(
            "order",
            0,
            MockResponse::tool_call("get_order_status", serde_json::json!({"id": 42})),
        )
        .script("order", 0, MockResponse::text("Order 42 is shipped."));
    let suite = suite(vec![scenario(
        r#"
id: order
turns:
  - role: user
    content: "Where is order 42?"
    assertions:
      - type: tools_called
        names: [get_order_status]
"#,
    )]);

    let scheduler = scheduler(suite, mock).with_tools(
        ToolRegistry::new().with(Arc::new(StaticTool::new("get_order_status", "orders", "shipped"))),
    );

    let results = scheduler.run_all().await.unwrap();
    let run = &results[0];
    assert!(run.error.is_none(), "error: {:?}", run.error);
    // user, assistant(tool_calls), tool, assistant — three after the user.
    assert_eq!(run.messages.len(), 4);
    assert_eq!(run.tool_stats.total_calls, 1);
    assert!(run.violations.is_empty(), "tools_called should pass");
    assert!(run.passed());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 4 & 5. Context budget strategies
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn long_turns_scenario(id: &str, strategy: &str) -> ScenarioSpec {
    let filler = "lorem ".repeat(80);
    let mut yaml = format!(
        "id: {id}\ncontext_policy:\n  token_budget: 500\n  reserve_for_output: 0\n  strategy: {strategy}\nturns:\n"
    );
    for i in 0..7 {
        yaml.push_str(&format!("  - role: user\n    content: \"turn {i} {filler}\"\n"));
    }
    scenario(&yaml)
}

#[tokio::test]
async fn context_oldest_truncates_and_completes() {
    let mock = MockProvider::new("mock").with_default(MockResponse::text("noted"));
    let suite = suite(vec![long_turns_scenario("ctx", "oldest")]);
    let results = scheduler(suite, mock).run_all().await.unwrap();

    let run = &results[0];
    assert!(run.error.is_none(), "error: {:?}", run.error);
    let truncated_turn = run.messages.iter().find(|m| {
        m.meta
            .get("context_truncated")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    });
    let truncated_turn = truncated_turn.expect("some turn should be truncated");
    assert!(
        truncated_turn
            .meta
            .get("context_dropped_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            > 0
    );
}

#[tokio::test]
async fn context_fail_strategy_seals_the_run() {
    let mock = MockProvider::new("mock").with_default(MockResponse::text("noted"));
    let suite = suite(vec![long_turns_scenario("ctx", "fail")]);
    let results = scheduler(suite, mock).run_all().await.unwrap();

    let run = &results[0];
    let error = run.error.as_deref().expect("run should fail");
    assert!(error.contains("budget"), "error: {error}");
    // Later turns were not executed: far fewer than 14 messages.
    assert!(run.messages.len() < 14);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 6. LLM judge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn llm_judge_conversation_assertion() {
    // Keyed script answers the scenario turn; the judge call carries no
    // scenario key and falls through to the default verdict.
    let mock = MockProvider::new("mock")
        .script("polite", 0, MockResponse::text("Of course! Happy to help."))
        .with_default(MockResponse::text(
            r#"{"score": 0.9, "reasoning": "friendly and respectful"}"#,
        ));
    let suite = suite(vec![scenario(
        r#"
id: polite
turns:
  - role: user
    content: "Can you help me?"
conversation_assertions:
  - type: llm_judge
    rubric: "response is polite"
    threshold: 0.7
"#,
    )]);

    let results = scheduler(suite, mock).run_all().await.unwrap();
    let run = &results[0];
    assert!(run.error.is_none(), "error: {:?}", run.error);

    let summary = run.conversation_assertions.as_ref().expect("summary");
    assert_eq!(summary.total, 1);
    assert!(summary.passed);
    let judge = &summary.results[0];
    assert_eq!(judge.details["score"], serde_json::json!(0.9));
    assert!(!judge.details["reasoning"].as_str().unwrap().is_empty());
    assert!(judge.details.contains_key("duration_ms"));
    assert!(run.passed());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Determinism & global deadline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn mock_runs_are_byte_deterministic() {
    let build = || {
        let mock = MockProvider::new("mock")
            .script("greet", 0, MockResponse::text("Hello!"))
            .script(
                "order",
                0,
                MockResponse::tool_call("get_order_status", serde_json::json!({"id": 42})),
            )
            .script("order", 0, MockResponse::text("Order 42 is shipped."));
        let suite = suite(vec![
            scenario("id: greet\nturns:\n  - role: user\n    content: Say hi\n"),
            scenario("id: order\nturns:\n  - role: user\n    content: \"Where is order 42?\"\n"),
        ]);
        scheduler(suite, mock).with_tools(
            ToolRegistry::new()
                .with(Arc::new(StaticTool::new("get_order_status", "orders", "shipped"))),
        )
    };

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let results = build().run_all().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let repo = JsonRepository::new(dir.path());
        repo.save_results(&results).unwrap();
        outputs.push(std::fs::read(dir.path().join("results.json")).unwrap());
    }
    assert_eq!(outputs[0], outputs[1], "results.json must be byte-identical");
}

#[tokio::test]
async fn global_deadline_cancels_remaining_runs() {
    // A provider that never finishes within the deadline.
    let mock = MockProvider::new("mock").with_default(MockResponse::text("ok"));
    let mut s = suite(vec![scenario(
        "id: slow\nturns:\n  - role: user\n    content: hi\n",
    )]);
    s.defaults.timeouts.global_deadline_secs = Some(30);

    // Fast case: everything completes well inside the deadline.
    let results = scheduler(s, mock)
        .with_options(SchedulerOptions {
            concurrency: 2,
            global_deadline: Some(std::time::Duration::from_secs(30)),
            streaming: false,
        })
        .run_all()
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].error.is_none());
}
