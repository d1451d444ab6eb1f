//! Persisted conversation records — messages and the threads that own them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tool::ToolCall;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured annotations on a message. All fields are optional; a plain
/// user message carries the default (empty) metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool-role messages: the call this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Back-references to the run/step that produced the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<Uuid>,
    /// Marks a context-manager condensation of older history.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub summary: bool,
    /// Set on assistant shells that are still streaming.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub in_progress: bool,
}

/// A persisted turn record. Messages are owned by their thread; runs hold
/// only references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    fn new(thread_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn system(thread_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(thread_id, Role::System, content)
    }

    pub fn user(thread_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(thread_id, Role::User, content)
    }

    pub fn assistant(thread_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(thread_id, Role::Assistant, content)
    }

    /// A tool-role message answering `tool_call_id`.
    pub fn tool_result(
        thread_id: Uuid,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(thread_id, Role::Tool, content);
        msg.metadata.tool_call_id = Some(tool_call_id.into());
        msg.metadata.tool_name = Some(tool_name.into());
        msg
    }

    /// A system-role condensation of older history, recognized by the
    /// context manager on subsequent turns.
    pub fn summary(thread_id: Uuid, content: impl Into<String>) -> Self {
        let mut msg = Self::new(thread_id, Role::System, content);
        msg.metadata.summary = true;
        msg
    }

    pub fn with_run(mut self, run_id: Uuid, step_id: Option<Uuid>) -> Self {
        self.metadata.run_id = Some(run_id);
        self.metadata.step_id = step_id;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.metadata.tool_calls = tool_calls;
        self
    }

    pub fn is_summary(&self) -> bool {
        self.metadata.summary
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Threads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A conversation thread. Threads own messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl Thread {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            title: None,
            user_id: None,
            created_at: Utc::now(),
            metadata: Value::Null,
        }
    }
}

impl Default for Thread {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_message_links_call() {
        let tid = Uuid::new_v4();
        let msg = Message::tool_result(tid, "call_1", "search", "{\"hits\":[]}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.metadata.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.metadata.tool_name.as_deref(), Some("search"));
    }

    #[test]
    fn summary_flag_round_trips_through_json() {
        let msg = Message::summary(Uuid::new_v4(), "earlier: user asked about flights");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(back.is_summary());
        assert_eq!(back.role, Role::System);
    }

    #[test]
    fn default_metadata_serializes_compactly() {
        let msg = Message::user(Uuid::new_v4(), "hi");
        let json = serde_json::to_value(&msg).unwrap();
        // Empty metadata should not leak optional fields.
        assert_eq!(json["metadata"], serde_json::json!({}));
    }

    #[test]
    fn with_run_sets_back_references() {
        let run_id = Uuid::new_v4();
        let step_id = Uuid::new_v4();
        let msg = Message::assistant(Uuid::new_v4(), "ok").with_run(run_id, Some(step_id));
        assert_eq!(msg.metadata.run_id, Some(run_id));
        assert_eq!(msg.metadata.step_id, Some(step_id));
    }
}
