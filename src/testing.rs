//! Mock collaborators for tests
//!
//! Scripted LLM transport and a handful of server tools with predictable
//! behavior.

use crate::conversation::{ConversationMessage, ToolInvocation, ToolPayload};
use crate::llm::{
    FrameStream, LlmError, LlmRequest, LlmResponse, LlmService, StreamFrame, ToolDefinition, Usage,
};
use crate::tools::{ServerTool, ToolContext, ToolError};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Mock LLM Service
// ============================================================================

/// LLM service returning queued responses and frame streams
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    streams: Mutex<VecDeque<Vec<Result<StreamFrame, LlmError>>>>,
    delay: Option<Duration>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering each request (for cancellation tests)
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a successful response
    pub fn queue_response(&self, message: ConversationMessage) {
        self.responses.lock().unwrap().push_back(Ok(LlmResponse {
            message,
            usage: usage(),
        }));
    }

    /// Queue a plain text answer
    pub fn queue_text(&self, text: &str) {
        self.queue_response(ConversationMessage::assistant(text, vec![]));
    }

    /// Queue an answer made only of tool invocations
    pub fn queue_tool_calls(&self, invocations: Vec<ToolInvocation>) {
        self.queue_response(ConversationMessage::assistant("", invocations));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Queue frames for the next streaming request
    pub fn queue_stream(&self, frames: Vec<Result<StreamFrame, LlmError>>) {
        self.streams.lock().unwrap().push_back(frames);
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn record(&self, request: &LlmRequest) {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Usage reported by every scripted response
pub fn usage() -> Usage {
    Usage {
        input_tokens: 100,
        output_tokens: 20,
        cached_tokens: 0,
        cost_usd: 0.01,
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.record(request).await;
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    async fn stream(&self, request: &LlmRequest) -> Result<FrameStream, LlmError> {
        self.record(request).await;
        let frames = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::network("No mock stream queued"))?;
        Ok(futures::stream::iter(frames).boxed())
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// Mock Tools
// ============================================================================

/// Client tool definition with an open schema
pub fn client_tool(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: format!("Client-side {name}"),
        input_schema: json!({"type": "object"}),
    }
}

/// Returns its arguments as JSON
pub struct EchoTool {
    name: String,
}

impl EchoTool {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ServerTool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        "Echo the arguments".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, arguments: Value, _ctx: ToolContext<'_>) -> Result<ToolPayload, ToolError> {
        Ok(ToolPayload::Json(arguments))
    }
}

/// Always reports a fault
pub struct FailingTool;

#[async_trait]
impl ServerTool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> String {
        "Always fails".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _arguments: Value, _ctx: ToolContext<'_>) -> Result<ToolPayload, ToolError> {
        Err(ToolError::new("disk on fire"))
    }
}

/// Panics when executed
pub struct PanickingTool;

#[async_trait]
impl ServerTool for PanickingTool {
    fn name(&self) -> &str {
        "panicking"
    }

    fn description(&self) -> String {
        "Panics".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _arguments: Value, _ctx: ToolContext<'_>) -> Result<ToolPayload, ToolError> {
        panic!("index out of bounds");
    }
}

/// Sleeps before answering; ignores cancellation so the engine must race it
pub struct SlowTool {
    delay: Duration,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ServerTool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> String {
        "Takes a while".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _arguments: Value, ctx: ToolContext<'_>) -> Result<ToolPayload, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(ToolPayload::Text(format!("done with {}", ctx.call_id)))
    }
}
