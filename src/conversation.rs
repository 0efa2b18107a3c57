//! Conversation store
//!
//! Ordered message history plus the scalar state that must survive a
//! suspension: execution phase, the property bag carrying the continuation,
//! accumulated usage and the executed-tool log.

pub mod continuation;
pub mod message;

pub use continuation::{ContinuationError, ContinuationState};
pub use message::{
    ContentItem, ContentPart, ConversationMessage, Role, ToolInvocation, ToolPayload, ToolResult,
};

use crate::llm::Usage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Whether the conversation is running normally or parked on a client tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Normal operation; request messages are sanitized
    #[default]
    ExecutingScene,
    /// A client tool result is outstanding; pairing is knowingly incomplete
    AwaitingClient,
}

/// Mutation guard violations
#[derive(Debug, Error, PartialEq)]
pub enum ConversationError {
    #[error("Tool invocations may only appear in assistant messages (got {0} message)")]
    InvocationOutsideAssistant(Role),
    #[error("Tool results may only appear in tool messages (got {0} message)")]
    ResultOutsideTool(Role),
    #[error("Message not found: {0}")]
    MessageNotFound(String),
}

/// How an executed tool call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Completed,
    Failed,
}

/// Entry in the executed-tool log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTool {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
    /// Set when the result came back from a client interaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interaction_id: Option<String>,
}

/// A conversation and all of its durable state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: String,
    messages: Vec<ConversationMessage>,
    #[serde(default)]
    phase: ExecutionPhase,
    #[serde(default)]
    properties: BTreeMap<String, String>,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    executed_tools: Vec<ExecutedTool>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            phase: ExecutionPhase::ExecutingScene,
            properties: BTreeMap::new(),
            usage: Usage::default(),
            executed_tools: Vec::new(),
        }
    }

    /// Reassemble a conversation loaded from storage
    pub(crate) fn from_parts(
        id: String,
        messages: Vec<ConversationMessage>,
        phase: ExecutionPhase,
        properties: BTreeMap<String, String>,
        usage: Usage,
        executed_tools: Vec<ExecutedTool>,
    ) -> Self {
        Self {
            id,
            messages,
            phase,
            properties,
            usage,
            executed_tools,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: ExecutionPhase) {
        if self.phase != phase {
            tracing::debug!(conv_id = %self.id, from = ?self.phase, to = ?phase, "Phase change");
        }
        self.phase = phase;
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn active_messages(&self) -> impl Iterator<Item = &ConversationMessage> {
        self.messages.iter().filter(|m| m.is_active)
    }

    /// Append a message, enforcing which roles may carry tool content
    pub fn append(
        &mut self,
        message: ConversationMessage,
    ) -> Result<&ConversationMessage, ConversationError> {
        if message.role != Role::Assistant && message.invocations().next().is_some() {
            return Err(ConversationError::InvocationOutsideAssistant(message.role));
        }
        if message.role != Role::Tool && message.results().next().is_some() {
            return Err(ConversationError::ResultOutsideTool(message.role));
        }
        self.messages.push(message);
        let index = self.messages.len() - 1;
        Ok(&self.messages[index])
    }

    /// Exclude a message from future requests while keeping it for audit
    pub fn deactivate(&mut self, message_id: &str) -> Result<(), ConversationError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ConversationError::MessageNotFound(message_id.to_string()))?;
        message.is_active = false;
        Ok(())
    }

    /// Whether any message, active or not, already carries a result for `call_id`
    pub fn has_tool_result(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .flat_map(ConversationMessage::results)
            .any(|r| r.call_id == call_id)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.properties
    }

    /// Decode the stored continuation, if any
    pub fn continuation(&self) -> Result<Option<ContinuationState>, ContinuationError> {
        ContinuationState::load(&self.properties)
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn record_usage(&mut self, usage: &Usage) {
        self.usage.add(usage);
    }

    pub fn executed_tools(&self) -> &[ExecutedTool] {
        &self.executed_tools
    }

    pub(crate) fn record_execution(&mut self, entry: ExecutedTool) {
        self.executed_tools.push(entry);
    }

    /// Whether a client interaction's result has already been folded in
    pub fn has_resolved_interaction(&self, interaction_id: &str) -> bool {
        self.executed_tools
            .iter()
            .any(|e| e.interaction_id.as_deref() == Some(interaction_id))
    }
}
