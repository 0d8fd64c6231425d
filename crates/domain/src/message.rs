use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cost::CostInfo;
use crate::validation::{de_validations, ValidationResult};

/// A tool call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// The outcome of invoking a tool, carried by a `tool`-role message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Where a media part's bytes live: inline base64, a local file, or a URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaSource {
    Inline { data: String },
    File { path: PathBuf },
    Url { url: String },
}

/// One segment of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        #[serde(flatten)]
        source: MediaSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Audio {
        #[serde(flatten)]
        source: MediaSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Video {
        #[serde(flatten)]
        source: MediaSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    Document {
        #[serde(flatten)]
        source: MediaSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, Self::Text { .. })
    }
}

/// A single message in a conversation.
///
/// Exactly one of `content` or `parts` is authoritative. Tool-role messages
/// carry `tool_result` and an empty `tool_calls` list. A message is appended
/// once and never mutated afterwards, except that the runner attaches
/// `validations`, `cost_info`, and `latency_ms` immediately after the
/// provider returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_info: Option<CostInfo>,
    #[serde(
        default,
        deserialize_with = "de_validations",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub validations: Vec<ValidationResult>,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl Message {
    fn empty(role: Role) -> Self {
        Self {
            role,
            content: None,
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_result: None,
            meta: BTreeMap::new(),
            latency_ms: 0,
            cost_info: None,
            validations: Vec::new(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::empty(Role::System)
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::empty(Role::User)
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::empty(Role::Assistant)
        }
    }

    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            parts,
            ..Self::empty(role)
        }
    }

    pub fn assistant_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let text = text.into();
        Self {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
            ..Self::empty(Role::Assistant)
        }
    }

    pub fn tool(result: ToolResult) -> Self {
        Self {
            content: Some(result.content.clone()),
            tool_result: Some(result),
            ..Self::empty(Role::Tool)
        }
    }

    /// Concatenated textual view: the flat `content` when present, otherwise
    /// all `Text` parts joined with `\n`.
    pub fn get_content(&self) -> String {
        if let Some(content) = &self.content {
            return content.clone();
        }
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_media(&self) -> bool {
        self.parts.iter().any(ContentPart::is_media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_content_prefers_flat_content() {
        let msg = Message::user("hello");
        assert_eq!(msg.get_content(), "hello");
    }

    #[test]
    fn get_content_joins_text_parts() {
        let msg = Message::with_parts(
            Role::User,
            vec![
                ContentPart::text("first"),
                ContentPart::Image {
                    source: MediaSource::Url {
                        url: "https://example.com/a.png".into(),
                    },
                    mime_type: Some("image/png".into()),
                },
                ContentPart::text("second"),
            ],
        );
        assert_eq!(msg.get_content(), "first\nsecond");
        assert!(msg.has_media());
    }

    #[test]
    fn tool_message_carries_result_not_calls() {
        let msg = Message::tool(ToolResult {
            name: "get_order_status".into(),
            content: "shipped".into(),
            error: None,
            call_id: Some("call_1".into()),
        });
        assert_eq!(msg.role, Role::Tool);
        assert!(msg.tool_calls.is_empty());
        assert_eq!(msg.tool_result.as_ref().unwrap().content, "shipped");
    }

    #[test]
    fn serde_skips_empty_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("role"));
        assert!(obj.contains_key("content"));
        assert!(!obj.contains_key("parts"));
        assert!(!obj.contains_key("tool_calls"));
        assert!(!obj.contains_key("latency_ms"));
        assert!(!obj.contains_key("validations"));
    }

    #[test]
    fn media_source_round_trips() {
        let part = ContentPart::Image {
            source: MediaSource::Inline { data: "aGk=".into() },
            mime_type: Some("image/png".into()),
        };
        let json = serde_json::to_string(&part).unwrap();
        assert!(json.contains("\"data\""));
        let back: ContentPart = serde_json::from_str(&json).unwrap();
        assert_eq!(back, part);
    }
}
