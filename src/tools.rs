//! Tool contracts consumed by the execution engine
//!
//! Server tools run inside the engine through [`ServerTool`]. Client tools
//! run outside it; the engine only needs their definitions, held in a
//! [`ClientToolCatalog`], to recognize them and suspend.

use crate::conversation::{Conversation, ToolPayload};
use crate::llm::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Fault reported by a server tool
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Per-call context handed to a server tool.
///
/// Long-running tools should watch `cancel`; the engine also races every
/// tool against it and abandons the call when it fires.
#[derive(Clone)]
pub struct ToolContext<'a> {
    pub cancel: CancellationToken,
    pub conversation: &'a Conversation,
    pub call_id: &'a str,
}

/// A tool executed by the engine
#[async_trait]
pub trait ServerTool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Run the tool. Faults are returned, never thrown; the engine turns them
    /// into error results.
    async fn execute(&self, arguments: Value, ctx: ToolContext<'_>) -> Result<ToolPayload, ToolError>;
}

/// Canonical form used to match model-issued names against registered tools
pub fn normalize_tool_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Server tools available to a conversation
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ServerTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tool(mut self, tool: impl ServerTool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    /// Add a tool; a later registration under the same normalized name wins
    pub fn register(&mut self, tool: Arc<dyn ServerTool>) {
        let key = normalize_tool_name(tool.name());
        self.tools
            .retain(|existing| normalize_tool_name(existing.name()) != key);
        self.tools.push(tool);
    }

    /// Look up a tool by name, ignoring case and `-`/`_`/space differences
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ServerTool>> {
        let key = normalize_tool_name(name);
        self.tools
            .iter()
            .find(|tool| normalize_tool_name(tool.name()) == key)
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Tools whose execution happens outside the engine
#[derive(Debug, Default, Clone)]
pub struct ClientToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl ClientToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tool(mut self, definition: ToolDefinition) -> Self {
        let key = normalize_tool_name(&definition.name);
        self.tools
            .retain(|existing| normalize_tool_name(&existing.name) != key);
        self.tools.push(definition);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = normalize_tool_name(name);
        self.tools
            .iter()
            .any(|tool| normalize_tool_name(&tool.name) == key)
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }
}
