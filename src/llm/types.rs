//! Common types for LLM interactions

use crate::conversation::{ContentPart, ConversationMessage, ToolInvocation};
use serde::{Deserialize, Serialize};

/// LLM request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

/// Tool definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Complete (non-streamed) LLM response
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: ConversationMessage,
    pub usage: Usage,
}

impl LlmResponse {
    /// Tool invocations requested by the response
    pub fn invocations(&self) -> Vec<&ToolInvocation> {
        self.message.invocations().collect()
    }

    /// Get text content from the response
    pub fn text(&self) -> String {
        self.message.text()
    }
}

/// Token and cost counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Fragment of a tool invocation as it arrives on the wire.
///
/// Fragments sharing a `call_id` are concatenated; an empty `call_id`
/// continues the most recent invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub call_id: String,
    pub name: String,
    /// Partial or complete JSON text of the arguments
    pub arguments: String,
}

impl ToolCallFragment {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Continuation of the previous fragment's arguments
    pub fn continuation(arguments: impl Into<String>) -> Self {
        Self {
            arguments: arguments.into(),
            ..Self::default()
        }
    }
}

/// One incremental frame from a streaming transport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFrame {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
    pub media: Vec<ContentPart>,
    /// Per-frame usage delta
    pub usage: Usage,
    /// Explicit completion marker
    pub done: bool,
}

impl StreamFrame {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            text: Some(delta.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(fragment: ToolCallFragment) -> Self {
        Self {
            tool_calls: vec![fragment],
            ..Self::default()
        }
    }

    pub fn media(part: ContentPart) -> Self {
        Self {
            media: vec![part],
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}
