//! Database schema and row encodings

use crate::conversation::ExecutionPhase;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    phase TEXT NOT NULL DEFAULT 'executing_scene',
    properties TEXT NOT NULL DEFAULT '{}',
    usage TEXT NOT NULL DEFAULT '{}',
    executed_tools TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_phase ON conversations(phase);
CREATE INDEX IF NOT EXISTS idx_conversations_updated ON conversations(updated_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    conversation_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,

    PRIMARY KEY (conversation_id, message_id),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, sequence_id);
";

/// Column value for a phase
pub fn phase_name(phase: ExecutionPhase) -> &'static str {
    match phase {
        ExecutionPhase::ExecutingScene => "executing_scene",
        ExecutionPhase::AwaitingClient => "awaiting_client",
    }
}

pub fn parse_phase(name: &str) -> Option<ExecutionPhase> {
    match name {
        "executing_scene" => Some(ExecutionPhase::ExecutingScene),
        "awaiting_client" => Some(ExecutionPhase::AwaitingClient),
        _ => None,
    }
}
