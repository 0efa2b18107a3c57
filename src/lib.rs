//! Conversation protocol engine for tool-calling LLM turns
//!
//! Keeps a conversation's tool invocations and tool results paired the way
//! chat APIs demand, runs server tools, and suspends on client tools so a
//! turn can be resumed later, possibly by another process.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod conversation;
pub mod db;
pub mod dedup;
pub mod engine;
pub mod llm;
pub mod sanitizer;
pub mod streaming;
pub mod tools;
pub mod turn;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use conversation::{
    ContentItem, ContentPart, ContinuationState, Conversation, ConversationMessage,
    ExecutionPhase, Role, ToolInvocation, ToolPayload, ToolResult,
};
pub use db::{Database, DbError};
pub use engine::{
    BatchRun, ClientInteractionRequest, ClientInteractionResult, EngineError, ToolEngine, ToolStep,
};
pub use llm::{LlmError, LlmService, LoggingService};
pub use sanitizer::{build_request_messages, validate};
pub use streaming::{optimistic_stream, StreamAccumulator, StreamEvent, StreamOutcome};
pub use tools::{ClientToolCatalog, ServerTool, ToolContext, ToolError, ToolRegistry};
pub use turn::{TurnDriver, TurnEvent, TurnOutcome};
