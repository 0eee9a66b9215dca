//! Host-side tools the backend can call during a conversation.

mod invoker;
mod schema;
mod tool;

pub use invoker::{ToolInvoker, ToolResult};
pub use schema::validate_arguments;
pub use tool::{ToolDefinition, ToolError, ToolHandler};
