//! Resolves and executes tool calls requested by the backend.
//!
//! Every call produces exactly one [`ToolResult`]. Lookup failures, schema
//! violations, handler errors, panics and timeouts are all converted into a
//! structured error payload so the session keeps running.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::schema::validate_arguments;
use super::tool::{ToolDefinition, ToolError};
use crate::core::history::ToolCallRecord;
use crate::core::realtime::protocol::{PendingToolCall, ToolCallState};

/// Outcome of one tool invocation, ready to be sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub arguments: String,
    /// JSON-encoded output or structured error
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    fn success(call: &PendingToolCall, output: Value) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            output: output.to_string(),
            is_error: false,
        }
    }

    fn failure(call: &PendingToolCall, error: &ToolError) -> Self {
        let output = json!({
            "error": {
                "type": error.kind(),
                "message": error.to_string(),
            }
        });
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            output: output.to_string(),
            is_error: true,
        }
    }

    /// History record for this result.
    pub fn to_record(&self) -> ToolCallRecord {
        ToolCallRecord {
            call_id: self.call_id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.clone(),
            result: self.output.clone(),
            is_error: self.is_error,
        }
    }
}

/// Name-indexed set of tools for one settings snapshot.
#[derive(Debug, Default)]
pub struct ToolInvoker {
    tools: HashMap<String, ToolDefinition>,
    timeout: Option<Duration>,
}

impl ToolInvoker {
    /// Build an invoker from tool definitions. Later definitions with a
    /// duplicate name replace earlier ones.
    pub fn new(tools: impl IntoIterator<Item = ToolDefinition>) -> Self {
        let mut map = HashMap::new();
        for tool in tools {
            if let Some(previous) = map.insert(tool.name.clone(), tool) {
                warn!(tool = %previous.name, "Duplicate tool definition replaced");
            }
        }
        Self {
            tools: map,
            timeout: None,
        }
    }

    /// Bound each execution; exceeding it yields a `timeout` error result.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a completed tool call.
    ///
    /// The call moves through `Dispatched` to `Resolved`; it must arrive in
    /// the `Complete` state.
    pub async fn invoke(&self, call: &mut PendingToolCall) -> ToolResult {
        if call.state != ToolCallState::Complete {
            warn!(
                call_id = %call.call_id,
                state = ?call.state,
                "Invoking tool call that was not marked complete"
            );
        }
        call.state = ToolCallState::Dispatched;

        let result = match self.run(call).await {
            Ok(output) => {
                info!(call_id = %call.call_id, tool = %call.name, "Tool call succeeded");
                ToolResult::success(call, output)
            }
            Err(error) => {
                warn!(
                    call_id = %call.call_id,
                    tool = %call.name,
                    error = %error,
                    "Tool call failed"
                );
                ToolResult::failure(call, &error)
            }
        };

        call.state = ToolCallState::Resolved;
        result
    }

    async fn run(&self, call: &PendingToolCall) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let arguments = parse_arguments(&call.arguments)?;
        if let Some(schema) = &tool.parameters {
            validate_arguments(schema, &arguments).map_err(ToolError::InvalidArguments)?;
        }

        debug!(call_id = %call.call_id, tool = %call.name, "Executing tool");

        // Run on its own task so a panicking handler surfaces as a JoinError.
        let handler = tool.handler();
        let task = tokio::spawn(async move { handler.execute(arguments).await });
        let abort = task.abort_handle();

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(ToolError::Timeout(limit.as_millis() as u64));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ToolError::ExecutionFailed(format!(
                "tool '{}' panicked",
                call.name
            ))),
            Err(e) => Err(ToolError::ExecutionFailed(e.to_string())),
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
        .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}")))
}
