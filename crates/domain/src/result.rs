use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cost::CostInfo;
use crate::message::Message;
use crate::validation::{AssertionsSummary, ValidationError};

/// Per-run tool invocation counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    pub total_calls: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub failed_calls: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub per_tool: BTreeMap<String, u64>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl ToolStats {
    pub fn record(&mut self, name: &str, is_error: bool) {
        self.total_calls += 1;
        if is_error {
            self.failed_calls += 1;
        }
        *self.per_tool.entry(name.to_string()).or_default() += 1;
    }
}

/// A media artifact produced during a run (e.g. generated audio), referenced
/// by turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaOutput {
    pub turn_index: usize,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// The record of one (scenario, provider, region) cell. Constructed
/// incrementally by the runner and sealed exactly once, either when the
/// scenario completes or on a fatal error. Immutable after sealing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub scenario_id: String,
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(with = "crate::duration::go")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages: Vec<Message>,
    pub cost: CostInfo,
    pub tool_stats: ToolStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_assertions: Option<AssertionsSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_outputs: Vec<MediaOutput>,
}

impl RunResult {
    pub fn new(
        run_id: impl Into<String>,
        scenario_id: impl Into<String>,
        provider_id: impl Into<String>,
        region: Option<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            scenario_id: scenario_id.into(),
            provider_id: provider_id.into(),
            region,
            duration: Duration::ZERO,
            error: None,
            messages: Vec::new(),
            cost: CostInfo::default(),
            tool_stats: ToolStats::default(),
            violations: Vec::new(),
            conversation_assertions: None,
            media_outputs: Vec::new(),
        }
    }

    /// A run passes when it finished without a fatal error, no turn assertion
    /// failed, and conversation assertions (if any) passed.
    pub fn passed(&self) -> bool {
        self.error.is_none()
            && self.violations.is_empty()
            && self
                .conversation_assertions
                .as_ref()
                .map(|s| s.passed)
                .unwrap_or(true)
    }
}

/// Aggregate view over a batch of runs, written by `save_summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub total_runs: usize,
    pub passed_runs: usize,
    pub failed_runs: usize,
    #[serde(with = "crate::duration::go")]
    pub duration: Duration,
    pub total_cost_usd: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenarios: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<String>,
}

impl Summary {
    pub fn from_results(results: &[RunResult], duration: Duration) -> Self {
        let passed_runs = results.iter().filter(|r| r.passed()).count();
        let mut scenarios: Vec<String> = results.iter().map(|r| r.scenario_id.clone()).collect();
        scenarios.sort();
        scenarios.dedup();
        let mut providers: Vec<String> = results.iter().map(|r| r.provider_id.clone()).collect();
        providers.sort();
        providers.dedup();
        Self {
            total_runs: results.len(),
            passed_runs,
            failed_runs: results.len() - passed_runs,
            duration,
            total_cost_usd: results.iter().map(|r| r.cost.total_cost_usd).sum(),
            scenarios,
            providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationResult;

    #[test]
    fn tool_stats_record() {
        let mut stats = ToolStats::default();
        stats.record("get_order_status", false);
        stats.record("get_order_status", true);
        stats.record("search", false);
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.per_tool["get_order_status"], 2);
    }

    #[test]
    fn passed_accounts_for_error_and_assertions() {
        let mut result = RunResult::new("run-0001", "s1", "p1", None);
        assert!(result.passed());

        result.violations.push(ValidationError {
            turn_index: Some(0),
            assertion: "content_includes".into(),
            message: "missing pattern".into(),
        });
        assert!(!result.passed());

        result.violations.clear();
        result.conversation_assertions = Some(AssertionsSummary::from_results(vec![
            ValidationResult::fail("llm_judge", "score below threshold"),
        ]));
        assert!(!result.passed());

        result.conversation_assertions = None;
        result.error = Some("provider exploded".into());
        assert!(!result.passed());
    }

    #[test]
    fn run_result_json_field_names_are_normative() {
        let mut result = RunResult::new("run-0001", "s1", "p1", Some("us-east-1".into()));
        result.duration = Duration::from_millis(1500);
        let json = serde_json::to_value(&result).unwrap();
        let obj = json.as_object().unwrap();
        for key in ["run_id", "scenario_id", "provider_id", "region", "duration", "messages", "cost", "tool_stats"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(json["duration"], "1.5s");
    }

    #[test]
    fn summary_aggregates() {
        let mut failing = RunResult::new("run-0002", "s2", "p1", None);
        failing.error = Some("boom".into());
        let results = vec![RunResult::new("run-0001", "s1", "p1", None), failing];
        let summary = Summary::from_results(&results, Duration::from_secs(3));
        assert_eq!(summary.total_runs, 2);
        assert_eq!(summary.passed_runs, 1);
        assert_eq!(summary.failed_runs, 1);
        assert_eq!(summary.scenarios, vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(summary.providers, vec!["p1".to_string()]);
    }
}
