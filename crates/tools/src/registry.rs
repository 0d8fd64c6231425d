use std::collections::BTreeMap;
use std::sync::Arc;

use pk_domain::message::{ToolCall, ToolResult};
use pk_domain::{Error, Result};

use crate::{Tool, ToolDefinition};

/// Name-keyed collection of tools shared by all runs of a scheduler
/// instance.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions to advertise to the model, optionally filtered by a
    /// turn-level allow-list.
    pub fn definitions(&self, allowed: Option<&[String]>) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .filter(|t| match allowed {
                Some(names) => names.iter().any(|n| n == t.name()),
                None => true,
            })
            .map(|t| t.definition().clone())
            .collect()
    }

    /// Dispatch one tool call. An unknown tool name is a tool-level error
    /// result (the model can recover); a transport error from the tool
    /// itself propagates.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<ToolResult> {
        let Some(tool) = self.get(&call.name) else {
            tracing::warn!(tool = %call.name, "model called unknown tool");
            return Ok(ToolResult {
                name: call.name.clone(),
                content: String::new(),
                error: Some(format!("unknown tool: {}", call.name)),
                call_id: Some(call.id.clone()),
            });
        };

        let mut result = tool
            .invoke(call.args.clone())
            .await
            .map_err(|e| Error::Tool {
                tool: call.name.clone(),
                message: e.to_string(),
            })?;
        result.call_id = Some(call.id.clone());
        Ok(result)
    }
}
