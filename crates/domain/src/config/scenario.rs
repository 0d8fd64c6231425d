use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ContextPolicy;
use crate::message::ContentPart;

/// Who produces a turn. The two self-play variants are aliases: both drive a
/// secondary user-simulator provider; `gemini-user` is kept for files written
/// against older releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "selfplay-user")]
    SelfplayUser,
    #[serde(rename = "gemini-user")]
    GeminiUser,
}

impl TurnRole {
    pub fn is_selfplay(self) -> bool {
        matches!(self, Self::SelfplayUser | Self::GeminiUser)
    }
}

/// A declarative assertion: a `type` discriminator plus free-form params
/// interpreted by the matching factory in the assertion registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl AssertionSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Limits on tool usage within a single turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolConstraints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_calls: Option<u32>,
}

/// One step of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSpec {
    pub role: TurnRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ContentPart>,
    /// Persona prompt for self-play turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    /// Synthesize speech for this turn's content (duplex scenarios).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<bool>,
    /// Self-play repetition count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_constraints: Option<ToolConstraints>,
}

/// `spec` of a `kind: Scenario` document, or an inline scenario entry in an
/// arena file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub turns: Vec<TurnSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_assertions: Vec<AssertionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_policy: Option<ContextPolicy>,
    /// Bidirectional audio scenario (requires a duplex-capable provider).
    #[serde(default)]
    pub duplex: bool,
    /// Scenario-derived context: the lowest-priority layer of the variable
    /// resolution order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_from_yaml() {
        let spec: ScenarioSpec = serde_yaml::from_str(
            r#"
id: order-status
turns:
  - role: user
    content: "Where is order 42?"
    assertions:
      - type: tools_called
        names: [get_order_status]
  - role: selfplay-user
    persona: "An impatient customer"
    turns: 2
conversation_assertions:
  - type: llm_judge
    rubric: "agent stays polite"
    threshold: 0.7
"#,
        )
        .unwrap();
        assert_eq!(spec.id, "order-status");
        assert_eq!(spec.turns.len(), 2);
        assert!(spec.turns[1].role.is_selfplay());
        assert_eq!(spec.turns[1].turns, Some(2));
        assert_eq!(spec.conversation_assertions[0].kind, "llm_judge");
        assert_eq!(
            spec.conversation_assertions[0].params["threshold"],
            serde_json::json!(0.7)
        );
    }

    #[test]
    fn gemini_user_is_selfplay_alias() {
        let turn: TurnSpec =
            serde_yaml::from_str("role: gemini-user\npersona: tester\n").unwrap();
        assert!(turn.role.is_selfplay());
    }

    #[test]
    fn assertion_params_flatten() {
        let spec = AssertionSpec::new("content_includes")
            .with_param("patterns", serde_json::json!(["hello"]));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "content_includes");
        assert_eq!(json["patterns"][0], "hello");
    }
}
