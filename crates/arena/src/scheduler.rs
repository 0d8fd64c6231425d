//! The concurrent scheduler: fans the (scenario x provider x region)
//! matrix out over a bounded worker pool.
//!
//! Cells are enqueued in deterministic matrix order (scenario-major,
//! provider-minor) and assigned monotonic run ids; execution order is
//! whatever the pool yields. A failing run never cancels its siblings;
//! cancelling the scheduler's root token cancels everything, and queued
//! tasks release their semaphore slot on the way out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use pk_assertions::{AssertionRegistry, JudgeResolver};
use pk_context::WordCountEstimator;
use pk_domain::clock::{Clock, SystemClock};
use pk_domain::config::{ProviderSpec, ScenarioSpec};
use pk_domain::events::ArenaEvent;
use pk_domain::result::RunResult;
use pk_domain::{Error, Result};
use pk_hooks::HookRegistry;
use pk_providers::ProviderRegistry;
use pk_runner::{CancelToken, ConversationRunner, EventBus, RunSetup, RunnerConfig};
use pk_tools::ToolRegistry;

use crate::config::LoadedSuite;
use crate::state::StateStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Options & matrix cells
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub concurrency: usize,
    pub global_deadline: Option<Duration>,
    pub streaming: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            global_deadline: None,
            streaming: false,
        }
    }
}

/// One cell of the execution matrix.
#[derive(Debug, Clone)]
struct Cell {
    run_id: String,
    scenario_index: usize,
    provider_id: String,
    region: Option<String>,
}

fn run_id_for(seq: usize, scenario: &ScenarioSpec, provider: &ProviderSpec, region: Option<&str>) -> String {
    match region {
        Some(region) => format!("run-{seq:04}-{}-{}-{region}", scenario.id, provider.id),
        None => format!("run-{seq:04}-{}-{}", scenario.id, provider.id),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Scheduler {
    suite: Arc<LoadedSuite>,
    providers: Arc<ProviderRegistry>,
    tools: ToolRegistry,
    hooks: HookRegistry,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    state: Arc<StateStore>,
    cancel: CancelToken,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(suite: LoadedSuite, providers: ProviderRegistry, state: StateStore) -> Self {
        let options = SchedulerOptions {
            concurrency: suite.defaults.concurrency,
            global_deadline: suite
                .defaults
                .timeouts
                .global_deadline_secs
                .map(Duration::from_secs),
            streaming: suite.defaults.streaming,
        };
        Self {
            suite: Arc::new(suite),
            providers: Arc::new(providers),
            tools: ToolRegistry::new(),
            hooks: HookRegistry::new(),
            clock: Arc::new(SystemClock),
            bus: EventBus::default(),
            state: Arc::new(state),
            cancel: CancelToken::new(),
            options,
        }
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    /// Subscribe to run/turn/chunk events.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The root cancellation token; cancelling it unwinds every in-flight
    /// and queued run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> Arc<StateStore> {
        self.state.clone()
    }

    /// Expand the matrix in deterministic order: scenario-major,
    /// provider-minor, then the provider's regions.
    fn matrix(&self) -> Vec<Cell> {
        let mut cells = Vec::new();
        let mut seq = 0usize;
        for (scenario_index, scenario) in self.suite.scenarios.iter().enumerate() {
            for provider in &self.suite.providers {
                for region in provider.matrix_regions() {
                    seq += 1;
                    cells.push(Cell {
                        run_id: run_id_for(seq, scenario, provider, region.as_deref()),
                        scenario_index,
                        provider_id: provider.id.clone(),
                        region,
                    });
                }
            }
        }
        cells
    }

    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            streaming: self.options.streaming,
            max_tool_calls: self.suite.defaults.max_tool_calls,
            max_input_chars: None,
            timeouts: self.suite.defaults.timeouts,
            retry: self.suite.defaults.retry,
        }
    }

    /// Run every cell and return the sealed results in matrix order.
    pub async fn run_all(&self) -> Result<Vec<RunResult>> {
        let cells = self.matrix();
        tracing::info!(
            cells = cells.len(),
            concurrency = self.options.concurrency,
            "scheduling arena matrix"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut join_set: JoinSet<RunResult> = JoinSet::new();
        let mut cell_index: HashMap<tokio::task::Id, Cell> = HashMap::new();

        for cell in cells {
            let task = self.spawn_cell(&cell, semaphore.clone())?;
            let handle = join_set.spawn(task);
            cell_index.insert(handle.id(), cell);
        }

        let results = self.collect(&mut join_set, &cell_index).await;

        let mut results = results;
        results.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(results)
    }

    /// Build the future for one cell. Admission happens inside the task so
    /// enqueueing never blocks; the permit is released when the run seals.
    fn spawn_cell(
        &self,
        cell: &Cell,
        semaphore: Arc<Semaphore>,
    ) -> Result<impl std::future::Future<Output = RunResult> + Send + 'static> {
        let scenario = self.suite.scenarios[cell.scenario_index].clone();
        let provider = self.providers.get(&cell.provider_id)?;
        let provider_spec = self
            .suite
            .providers
            .iter()
            .find(|p| p.id == cell.provider_id)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown provider: {}", cell.provider_id)))?;
        let vars = self.suite.variables_for(&scenario)?;

        // The judge defaults to the cell's own provider; `judge_provider`
        // selects any other configured provider by id.
        let judge_registry = self.providers.clone();
        let default_judge = provider.clone();
        let resolver: JudgeResolver = Arc::new(move |id| match id {
            Some(id) => judge_registry.get(id),
            None => Ok(default_judge.clone()),
        });
        let assertions =
            AssertionRegistry::builtin().with_judge(resolver, self.clock.clone());

        let runner = ConversationRunner {
            simulator: Some(provider.clone()),
            provider,
            tools: self.tools.clone(),
            hooks: self.hooks.clone(),
            assertions,
            estimator: Arc::new(WordCountEstimator::default()),
            clock: self.clock.clone(),
            bus: self.bus.clone(),
            config: self.runner_config(),
        };

        let setup = RunSetup {
            run_id: cell.run_id.clone(),
            region: cell.region.clone(),
            system_prompt: self.suite.system_prompt().map(String::from),
            vars,
            context_policy: self.suite.defaults.context_policy,
            request_defaults: provider_spec.defaults,
            cancel: self.cancel.child(),
        };

        let run_id = cell.run_id.clone();
        let scenario_id = scenario.id.clone();
        let provider_id = cell.provider_id.clone();
        let region = cell.region.clone();
        let cancel = setup.cancel.clone();

        Ok(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    let mut result = RunResult::new(run_id, scenario_id, provider_id, region);
                    result.error = Some(Error::Cancelled.to_string());
                    return result;
                }
            };
            if cancel.is_cancelled() {
                let mut result = RunResult::new(run_id, scenario_id, provider_id, region);
                result.error = Some(Error::Cancelled.to_string());
                return result;
            }
            runner.run(&scenario, setup).await
        })
    }

    /// Drain the join set, converting panics into failed runs and honouring
    /// the global deadline with a short grace period before hard-aborting.
    async fn collect(
        &self,
        join_set: &mut JoinSet<RunResult>,
        cell_index: &HashMap<tokio::task::Id, Cell>,
    ) -> Vec<RunResult> {
        const ABORT_GRACE: Duration = Duration::from_secs(5);

        let mut results = Vec::new();
        let mut deadline = self
            .options
            .global_deadline
            .map(|d| tokio::time::Instant::now() + d);
        let mut deadline_hit = false;

        loop {
            let joined = match deadline {
                Some(at) => match tokio::time::timeout_at(at, join_set.join_next_with_id()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        if deadline_hit {
                            tracing::warn!("grace period elapsed, aborting remaining runs");
                            join_set.abort_all();
                            deadline = None;
                        } else {
                            tracing::warn!("global deadline reached, cancelling in-flight runs");
                            deadline_hit = true;
                            self.cancel.cancel();
                            deadline = Some(tokio::time::Instant::now() + ABORT_GRACE);
                        }
                        continue;
                    }
                },
                None => join_set.join_next_with_id().await,
            };

            let Some(joined) = joined else { break };
            match joined {
                Ok((_id, result)) => {
                    self.state.insert(result.clone());
                    results.push(result);
                }
                Err(join_error) => {
                    // Panic (or hard abort) isolation: the failing run is
                    // recorded, siblings keep going.
                    let cell = cell_index.get(&join_error.id());
                    let (run_id, scenario_id, provider_id, region) = match cell {
                        Some(cell) => (
                            cell.run_id.clone(),
                            self.suite.scenarios[cell.scenario_index].id.clone(),
                            cell.provider_id.clone(),
                            cell.region.clone(),
                        ),
                        None => ("unknown".to_string(), String::new(), String::new(), None),
                    };
                    let error = if join_error.is_panic() {
                        format!("panic in runner: {join_error}")
                    } else {
                        Error::Cancelled.to_string()
                    };
                    tracing::error!(run_id = %run_id, %error, "run task failed");
                    self.bus.emit(ArenaEvent::RunFailed {
                        run_id: run_id.clone(),
                        error: error.clone(),
                    });
                    let mut result = RunResult::new(run_id, scenario_id, provider_id, region);
                    result.error = Some(error);
                    self.state.insert(result.clone());
                    results.push(result);
                }
            }
        }
        results
    }
}
