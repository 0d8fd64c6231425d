//! Tool-usage assertion kinds.

use std::collections::BTreeSet;

use serde::Deserialize;

use pk_domain::validation::{ValidationResult, Violation};

use crate::{Assertion, Subject};

#[derive(Debug, Deserialize)]
pub struct ToolNamesParams {
    pub names: Vec<String>,
}

/// Passes when every named tool was called at least once in scope.
pub struct ToolsCalled {
    pub names: Vec<String>,
}

#[async_trait::async_trait]
impl Assertion for ToolsCalled {
    fn kind(&self) -> &str {
        "tools_called"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        let called: BTreeSet<&str> = subject
            .tool_calls()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        let missing: Vec<&String> = self
            .names
            .iter()
            .filter(|n| !called.contains(n.as_str()))
            .collect();

        if missing.is_empty() {
            ValidationResult::pass(self.kind())
        } else {
            let mut result = ValidationResult::fail(
                self.kind(),
                format!("{} expected tool(s) never called", missing.len()),
            );
            for name in missing {
                result = result.with_violation(Violation::new(format!(
                    "tool {name:?} was not called"
                )));
            }
            result
        }
    }
}

/// Passes when none of the named tools were called in scope.
pub struct ToolsNotCalled {
    pub names: Vec<String>,
}

#[async_trait::async_trait]
impl Assertion for ToolsNotCalled {
    fn kind(&self) -> &str {
        "tools_not_called"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        let called: BTreeSet<&str> = subject
            .tool_calls()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        let hit: Vec<&String> = self
            .names
            .iter()
            .filter(|n| called.contains(n.as_str()))
            .collect();

        if hit.is_empty() {
            ValidationResult::pass(self.kind())
        } else {
            let mut result = ValidationResult::fail(
                self.kind(),
                format!("{} forbidden tool(s) called", hit.len()),
            );
            for name in hit {
                result = result
                    .with_violation(Violation::new(format!("tool {name:?} was called")));
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pk_domain::message::{Message, ToolCall};

    fn history_with_call(name: &str) -> Vec<Message> {
        vec![
            Message::user("check my order"),
            Message::assistant_tool_calls(
                "",
                vec![ToolCall {
                    id: "c1".into(),
                    name: name.into(),
                    args: serde_json::json!({"id": 42}),
                }],
            ),
            Message::assistant("Order 42 is shipped."),
        ]
    }

    #[tokio::test]
    async fn tools_called_finds_calls_across_the_conversation() {
        let history = history_with_call("get_order_status");
        let assertion = ToolsCalled {
            names: vec!["get_order_status".into()],
        };
        assert!(assertion.check(Subject::Conversation(&history)).await.passed);

        let missing = ToolsCalled {
            names: vec!["escalate".into()],
        };
        let result = missing.check(Subject::Conversation(&history)).await;
        assert!(!result.passed);
        assert!(result.violations[0].message.contains("escalate"));
    }

    #[tokio::test]
    async fn tools_not_called_rejects_forbidden_calls() {
        let history = history_with_call("delete_account");
        let assertion = ToolsNotCalled {
            names: vec!["delete_account".into()],
        };
        let result = assertion.check(Subject::Conversation(&history)).await;
        assert!(!result.passed);

        let ok = ToolsNotCalled {
            names: vec!["transfer_funds".into()],
        };
        assert!(ok.check(Subject::Conversation(&history)).await.passed);
    }
}
