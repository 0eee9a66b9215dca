//! Host-supplied tool definitions.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors produced while resolving or executing a tool.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    /// No tool with the requested name is registered
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Arguments are not valid JSON or do not match the parameter schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and reported a failure
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The tool did not finish in time
    #[error("Execution timed out after {0}ms")]
    Timeout(u64),
}

impl ToolError {
    /// Machine-readable error kind sent back to the provider.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::NotFound(_) => "tool_not_found",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::ExecutionFailed(_) => "execution_failed",
            ToolError::Timeout(_) => "timeout",
        }
    }
}

/// Executes a tool with JSON arguments and returns a JSON result.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send,
{
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        (self.0)(arguments).await
    }
}

/// Adapter turning a synchronous closure into a [`ToolHandler`].
struct SyncFnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for SyncFnHandler<F>
where
    F: Fn(Value) -> Result<Value, ToolError> + Send + Sync,
{
    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        (self.0)(arguments)
    }
}

/// A named capability the backend may invoke during a session.
///
/// Definitions are supplied by the host with the session settings and are
/// read-only while the session runs.
#[derive(Clone)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,
    /// Human-readable description forwarded to the backend
    pub description: String,
    /// JSON schema for the arguments object
    pub parameters: Option<Value>,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    /// Create a definition backed by a [`ToolHandler`] implementation.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<Value>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        }
    }

    /// Create a definition backed by an async closure.
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<Value>,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self::new(name, description, parameters, FnHandler(f))
    }

    /// Create a definition backed by a synchronous closure.
    pub fn from_sync_fn<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<Value>,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self::new(name, description, parameters, SyncFnHandler(f))
    }

    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        self.handler.clone()
    }
}

/// Definitions compare by their declared surface; handlers are opaque.
impl PartialEq for ToolDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.parameters == other.parameters
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_async_closure_tool() {
        let tool = ToolDefinition::from_fn("echo", "Echo arguments", None, |args| async move {
            Ok(json!({ "echo": args }))
        });
        let result = tool.handler().execute(json!({"a": 1})).await.unwrap();
        assert_eq!(result, json!({"echo": {"a": 1}}));
    }

    #[tokio::test]
    async fn test_sync_closure_tool_error() {
        let tool = ToolDefinition::from_sync_fn("fail", "Always fails", None, |_| {
            Err(ToolError::ExecutionFailed("boom".to_string()))
        });
        let err = tool.handler().execute(json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "execution_failed");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_debug_omits_handler() {
        let tool = ToolDefinition::from_sync_fn("noop", "Does nothing", None, |_| Ok(Value::Null));
        let debug = format!("{tool:?}");
        assert!(debug.contains("noop"));
        assert!(debug.contains(".."));
    }
}
