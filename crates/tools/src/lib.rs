//! Tool capability for PromptKit Arena.
//!
//! A [`Tool`] pairs a declarative JSON-Schema definition (shown to the
//! model) with an async `invoke` implementation. Transports are out of
//! scope: an MCP server, an HTTP endpoint, or an in-process closure all
//! plug in behind the same trait. The registry resolves calls by name and
//! applies per-turn allow-lists.

pub mod builtin;
pub mod registry;

pub use builtin::{FnTool, StaticTool};
pub use registry::ToolRegistry;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pk_domain::message::ToolResult;
use pk_domain::Result;

/// Declarative tool schema exposed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// A callable tool. Implementations must be cheap to share: the registry
/// hands out `Arc<dyn Tool>` across concurrent runs.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    fn name(&self) -> &str {
        &self.definition().name
    }

    /// Execute the tool. Tool-level failures should be reported inside the
    /// returned [`ToolResult::error`] so the model can react; an `Err` from
    /// this method is a transport failure and seals the turn.
    async fn invoke(&self, args: Value) -> Result<ToolResult>;
}
