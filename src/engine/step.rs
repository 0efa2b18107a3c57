//! Step values yielded while a batch of tool invocations runs

use crate::conversation::{ContentPart, ToolPayload, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request handed to the host when a client tool must run externally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInteractionRequest {
    pub interaction_id: String,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
}

/// Result of a client interaction, delivered to `resume`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInteractionResult {
    pub interaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub contents: Vec<ContentPart>,
}

impl ClientInteractionResult {
    pub fn success(interaction_id: impl Into<String>, contents: Vec<ContentPart>) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            error: None,
            contents,
        }
    }

    pub fn failure(interaction_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            error: Some(error.into()),
            contents: Vec::new(),
        }
    }

    /// Convert into the tool result answering `call_id`.
    ///
    /// An error string wins over contents. A single text part collapses to a
    /// plain text payload.
    pub fn into_tool_result(self, call_id: impl Into<String>) -> ToolResult {
        if let Some(error) = self.error {
            return ToolResult::error(call_id, error);
        }
        let payload = match <[ContentPart; 1]>::try_from(self.contents) {
            Ok([ContentPart::Text { text }]) => ToolPayload::Text(text),
            Ok([part]) => ToolPayload::Parts(vec![part]),
            Err(contents) if contents.is_empty() => ToolPayload::Text(String::new()),
            Err(contents) => ToolPayload::Parts(contents),
        };
        ToolResult::success(call_id, payload)
    }
}

/// One observable step of a batch run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolStep {
    /// A server tool is about to run
    Started { call_id: String, name: String },
    /// A server tool finished and its result was appended
    Completed {
        call_id: String,
        name: String,
        result: ToolPayload,
    },
    /// A client tool was reached; the batch is suspended
    AwaitingClient { request: ClientInteractionRequest },
    /// The tool was missing or faulted; an error result was appended
    Error {
        call_id: String,
        name: String,
        message: String,
    },
}

impl ToolStep {
    pub fn call_id(&self) -> &str {
        match self {
            ToolStep::Started { call_id, .. }
            | ToolStep::Completed { call_id, .. }
            | ToolStep::Error { call_id, .. } => call_id,
            ToolStep::AwaitingClient { request } => &request.call_id,
        }
    }
}
