//! In-process tool implementations used by fixtures and scripted scenarios.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use pk_domain::message::ToolResult;
use pk_domain::Result;

use crate::{Tool, ToolDefinition};

/// A tool that always returns the same content, regardless of arguments.
pub struct StaticTool {
    definition: ToolDefinition,
    content: String,
    error: Option<String>,
}

impl StaticTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            },
            content: content.into(),
            error: None,
        }
    }

    /// Make every invocation report a tool-level error.
    pub fn failing(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.definition.parameters = parameters;
        self
    }
}

#[async_trait::async_trait]
impl Tool for StaticTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn invoke(&self, _args: Value) -> Result<ToolResult> {
        Ok(ToolResult {
            name: self.definition.name.clone(),
            content: self.content.clone(),
            error: self.error.clone(),
            call_id: None,
        })
    }
}

type Handler = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<ToolResult>> + Send>> + Send + Sync,
>;

/// A tool backed by an async closure.
pub struct FnTool {
    definition: ToolDefinition,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult>> + Send + 'static,
    {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            handler: Arc::new(move |args| Box::pin(handler(args))),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FnTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        (self.handler)(args).await
    }
}
