//! Assertions: declarative checks over a turn's message or a whole
//! conversation.
//!
//! Each assertion kind is a distinct type with its own params record; the
//! [`AssertionRegistry`] dispatches by `type` string and new kinds are added
//! by registering a factory, not by subclassing. Assertions are pure
//! functions of `(subject, params)` — only the LLM judge performs I/O, to
//! its own judge provider.

pub mod content;
pub mod json;
pub mod judge;
pub mod registry;
pub mod tools;

pub use judge::LlmJudgeAssertion;
pub use registry::{AssertionRegistry, JudgeResolver};

use pk_domain::message::{Message, Role, ToolCall};
use pk_domain::validation::ValidationResult;

/// What an assertion inspects: one turn, or the full history.
///
/// A turn subject points at the message that completed the turn, plus the
/// turn's whole message scope (tool-call rounds included) so tool-usage
/// assertions see calls resolved earlier in the same turn.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Turn {
        message: &'a Message,
        scope: &'a [Message],
    },
    Conversation(&'a [Message]),
}

impl<'a> Subject<'a> {
    /// A turn with no tool sub-steps: the scope is the message itself.
    pub fn turn(message: &'a Message) -> Self {
        Self::Turn {
            message,
            scope: std::slice::from_ref(message),
        }
    }

    /// A turn whose scope spans tool-call rounds. `scope` must contain
    /// `message` (by convention as its last element).
    pub fn turn_with_scope(message: &'a Message, scope: &'a [Message]) -> Self {
        Self::Turn { message, scope }
    }

    /// The textual view: the turn's completing message, or every message's
    /// content joined with newlines.
    pub fn text(&self) -> String {
        match self {
            Subject::Turn { message, .. } => message.get_content(),
            Subject::Conversation(messages) => messages
                .iter()
                .map(|m| m.get_content())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// All tool calls in scope.
    pub fn tool_calls(&self) -> Vec<&'a ToolCall> {
        let messages: &[Message] = match self {
            Subject::Turn { scope, .. } => scope,
            Subject::Conversation(messages) => messages,
        };
        messages.iter().flat_map(|m| m.tool_calls.iter()).collect()
    }

    /// Role-labelled transcript, used by the LLM judge.
    pub fn transcript(&self) -> String {
        let render = |m: &Message| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            format!("{role}: {}", m.get_content())
        };
        let messages: &[Message] = match self {
            Subject::Turn { scope, .. } => scope,
            Subject::Conversation(messages) => messages,
        };
        messages.iter().map(render).collect::<Vec<_>>().join("\n")
    }
}

/// A single assertion, built from an [`pk_domain::config::AssertionSpec`]
/// by the registry.
#[async_trait::async_trait]
pub trait Assertion: Send + Sync {
    fn kind(&self) -> &str;

    async fn check(&self, subject: Subject<'_>) -> ValidationResult;
}
