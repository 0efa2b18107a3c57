//! Message and content types carried by a conversation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A model-issued request to call a named tool.
///
/// Serialized with camelCase keys because the same shape is persisted in the
/// `pendingTools` property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Build an invocation from a JSON value; non-object arguments become an empty map
    pub fn from_value(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(call_id, name, arguments)
    }
}

/// A typed content part: text or binary data with a media type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Data {
        #[serde(rename = "mediaType")]
        media_type: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn data(media_type: impl Into<String>, data: Vec<u8>) -> Self {
        ContentPart::Data {
            media_type: media_type.into(),
            data,
        }
    }
}

/// Payload of a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolPayload {
    Text(String),
    Json(Value),
    Parts(Vec<ContentPart>),
}

impl ToolPayload {
    /// Render the payload as plain text (for logs and text-only transports)
    pub fn to_text(&self) -> String {
        match self {
            ToolPayload::Text(text) => text.clone(),
            ToolPayload::Json(value) => value.to_string(),
            ToolPayload::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::Data { media_type, data } => {
                        format!("[{media_type}, {} bytes]", data.len())
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// The outcome of a tool invocation, paired to it by call id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub payload: ToolPayload,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, payload: ToolPayload) -> Self {
        Self {
            call_id: call_id.into(),
            payload,
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            payload: ToolPayload::Text(message.into()),
            is_error: true,
        }
    }
}

/// A single item in a message's content list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    ToolInvocation(ToolInvocation),
    ToolResult(ToolResult),
    Media { part: ContentPart },
}

/// A message in the conversation history.
///
/// Content is fixed once appended; only `is_active` may change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: Vec<ContentItem>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: Vec<ContentItem>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentItem::Text { text: text.into() }])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentItem::Text { text: text.into() }])
    }

    /// Assistant message with optional text followed by tool invocations
    pub fn assistant(text: impl Into<String>, invocations: Vec<ToolInvocation>) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(invocations.len() + 1);
        if !text.is_empty() {
            content.push(ContentItem::Text { text });
        }
        content.extend(invocations.into_iter().map(ContentItem::ToolInvocation));
        Self::new(Role::Assistant, content)
    }

    pub fn tool(result: ToolResult) -> Self {
        Self::new(Role::Tool, vec![ContentItem::ToolResult(result)])
    }

    /// Replace the generated id (fixtures and hosts with their own id scheme)
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.content.iter().filter_map(|item| match item {
            ContentItem::ToolInvocation(invocation) => Some(invocation),
            _ => None,
        })
    }

    pub fn results(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(|item| match item {
            ContentItem::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    /// Concatenated text content
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_content(&self) -> bool {
        !self.content.is_empty()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
