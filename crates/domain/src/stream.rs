use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::cost::TokenUsage;
use crate::message::ToolCall;

/// A boxed async stream, used for streaming provider responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

/// One streaming delta from a provider.
///
/// Providers must emit `tool_call_complete` for every call before `done`,
/// and `done` is always the last chunk. Partial `tool_call_delta`s may be
/// coalesced by consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    TextDelta {
        text: String,
    },
    ToolCallDelta {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        args_delta: String,
    },
    ToolCallComplete {
        call: ToolCall,
    },
    Usage {
        usage: TokenUsage,
    },
    Done {
        finish_reason: FinishReason,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_serde_is_tagged() {
        let chunk = StreamChunk::TextDelta { text: "hi".into() };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn finish_reason_snake_case() {
        assert_eq!(
            serde_json::to_string(&FinishReason::ToolCalls).unwrap(),
            "\"tool_calls\""
        );
        assert_eq!(
            serde_json::to_string(&FinishReason::ContentFilter).unwrap(),
            "\"content_filter\""
        );
    }
}
