use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single rule breach inside an assertion result, e.g. one banned pattern
/// that matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }
}

/// The outcome of one assertion against a message or a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn pass(kind: impl Into<String>) -> Self {
        Self {
            passed: true,
            kind: kind.into(),
            message: String::new(),
            details: BTreeMap::new(),
            violations: Vec::new(),
        }
    }

    pub fn fail(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            kind: kind.into(),
            message: message.into(),
            details: BTreeMap::new(),
            violations: Vec::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn with_violation(mut self, violation: Violation) -> Self {
        self.violations.push(violation);
        self
    }
}

/// A failed assertion attributed to its place in the run, collected on
/// [`crate::result::RunResult::violations`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<usize>,
    pub assertion: String,
    pub message: String,
}

/// Summary of conversation-level assertions. Absent when no assertions were
/// configured; `passed` requires at least one assertion to have run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionsSummary {
    pub total: usize,
    pub failed: usize,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ValidationResult>,
}

impl AssertionsSummary {
    pub fn from_results(results: Vec<ValidationResult>) -> Self {
        let total = results.len();
        let failed = results.iter().filter(|r| !r.passed).count();
        Self {
            total,
            failed,
            passed: failed == 0 && total > 0,
            results,
        }
    }
}

/// Deserialize a message's validation metadata.
///
/// Older result files used two other layouts besides the canonical array:
/// an object wrapping the array under `results`, and a flat map of assertion
/// type to pass/fail. All three are accepted on read; the array form is the
/// only emit format.
pub fn de_validations<'de, D>(de: D) -> Result<Vec<ValidationResult>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Layout {
        List(Vec<ValidationResult>),
        Keyed { results: Vec<ValidationResult> },
        Flat(BTreeMap<String, bool>),
    }

    Ok(match Layout::deserialize(de)? {
        Layout::List(results) => results,
        Layout::Keyed { results } => results,
        Layout::Flat(map) => map
            .into_iter()
            .map(|(kind, passed)| {
                if passed {
                    ValidationResult::pass(kind)
                } else {
                    ValidationResult::fail(kind, "failed")
                }
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn summary_requires_at_least_one_result() {
        let empty = AssertionsSummary::from_results(vec![]);
        assert_eq!(empty.total, 0);
        assert!(!empty.passed);

        let ok = AssertionsSummary::from_results(vec![ValidationResult::pass("content_includes")]);
        assert!(ok.passed);

        let failing = AssertionsSummary::from_results(vec![
            ValidationResult::pass("content_includes"),
            ValidationResult::fail("max_length", "too long"),
        ]);
        assert_eq!(failing.failed, 1);
        assert!(!failing.passed);
    }

    #[test]
    fn reads_canonical_array_layout() {
        let msg: Message = serde_json::from_str(
            r#"{"role":"assistant","content":"hi",
                "validations":[{"passed":true,"type":"content_includes"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.validations.len(), 1);
        assert!(msg.validations[0].passed);
    }

    #[test]
    fn reads_keyed_results_layout() {
        let msg: Message = serde_json::from_str(
            r#"{"role":"assistant","content":"hi",
                "validations":{"results":[{"passed":false,"type":"max_length","message":"too long"}]}}"#,
        )
        .unwrap();
        assert_eq!(msg.validations.len(), 1);
        assert_eq!(msg.validations[0].kind, "max_length");
    }

    #[test]
    fn reads_legacy_flat_map_layout() {
        let msg: Message = serde_json::from_str(
            r#"{"role":"assistant","content":"hi",
                "validations":{"content_includes":true,"max_length":false}}"#,
        )
        .unwrap();
        assert_eq!(msg.validations.len(), 2);
        let failed: Vec<_> = msg.validations.iter().filter(|v| !v.passed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].kind, "max_length");
    }

    #[test]
    fn emits_array_layout() {
        let mut msg = Message::assistant("hi");
        msg.validations.push(ValidationResult::pass("content_includes"));
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json["validations"].is_array());
    }
}
