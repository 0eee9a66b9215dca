//! Append-only conversation history.
//!
//! The [`HistoryLog`] records every finalized turn of a conversation in the
//! order it was produced: user transcripts, assistant responses, and tool
//! round-trips. Entries are immutable once appended and are shared as
//! `Arc<ChatMessage>`, so a [`HistoryLog::snapshot`] is a cheap point-in-time
//! copy that later appends never affect.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of the author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Spoken or typed input from the user
    User,
    /// Response produced by the backend
    Assistant,
    /// Result of a host-side tool invocation
    Tool,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
            ChatRole::Tool => write!(f, "tool"),
        }
    }
}

/// Tool invocation details attached to a `tool` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Provider-assigned call id
    pub call_id: String,
    /// Name of the tool that was requested
    pub name: String,
    /// Complete JSON arguments as received
    pub arguments: String,
    /// JSON result delivered back to the provider
    pub result: String,
    /// Whether `result` is a structured error
    pub is_error: bool,
}

/// A single finalized conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Locally generated message id
    pub id: String,
    /// Author of the message
    pub role: ChatRole,
    /// Text content (transcript, response text, or tool result)
    pub content: String,
    /// Provider response id for assistant messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Tool call details for tool messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallRecord>,
}

impl ChatMessage {
    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            response_id: None,
            tool_call: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    /// Create an assistant message tagged with the response it came from.
    pub fn assistant_for_response(
        content: impl Into<String>,
        response_id: impl Into<String>,
    ) -> Self {
        Self {
            response_id: Some(response_id.into()),
            ..Self::new(ChatRole::Assistant, content)
        }
    }

    /// Create a tool message from a completed invocation.
    pub fn tool(record: ToolCallRecord) -> Self {
        Self {
            tool_call: Some(record.clone()),
            ..Self::new(ChatRole::Tool, record.result)
        }
    }

    /// Whether this message repeats `other`: same role, content and
    /// response id. Untagged messages only match other untagged messages.
    pub fn same_content(&self, other: &ChatMessage) -> bool {
        self.role == other.role
            && self.content == other.content
            && self.response_id == other.response_id
    }
}

/// Thread-safe, insertion-ordered conversation log.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: RwLock<Vec<Arc<ChatMessage>>>,
}

impl HistoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the end of the log.
    pub fn append(&self, message: ChatMessage) -> Arc<ChatMessage> {
        let message = Arc::new(message);
        self.entries.write().push(message.clone());
        message
    }

    /// Append a message unless the most recent entry already carries the same
    /// role, content and response id.
    ///
    /// Providers may deliver a response both as a stream of deltas and as a
    /// separate completion message; the check and the append happen under one
    /// write lock so two racing producers cannot both append.
    pub fn append_unless_duplicate(&self, message: ChatMessage) -> Option<Arc<ChatMessage>> {
        let mut entries = self.entries.write();
        if entries
            .last()
            .is_some_and(|last| last.same_content(&message))
        {
            tracing::debug!(role = %message.role, "Skipping duplicate history entry");
            return None;
        }
        let message = Arc::new(message);
        entries.push(message.clone());
        Some(message)
    }

    /// Point-in-time copy of the log.
    pub fn snapshot(&self) -> Vec<Arc<ChatMessage>> {
        self.entries.read().clone()
    }

    /// Most recently appended message.
    pub fn last(&self) -> Option<Arc<ChatMessage>> {
        self.entries.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every entry.
    ///
    /// Server-side context of an already open connection is not affected.
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.entries.write();
            let removed = entries.len();
            entries.clear();
            removed
        };
        tracing::debug!(removed, "History cleared");
    }
}
