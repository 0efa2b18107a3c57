//! Durable conversation store
//!
//! Snapshots whole conversations into SQLite so a suspended batch can be
//! resumed by a different process.

mod schema;

pub use schema::{parse_phase, phase_name, SCHEMA};

use crate::conversation::{Conversation, ConversationMessage, ExecutionPhase, Role};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Database lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Persist a conversation snapshot in one transaction.
    ///
    /// Messages are upserted by id; only `is_active` changes for messages
    /// that were saved before.
    pub fn save_conversation(&self, conversation: &Conversation) -> DbResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO conversations (id, phase, properties, usage, executed_tools, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(id) DO UPDATE SET
                phase = excluded.phase,
                properties = excluded.properties,
                usage = excluded.usage,
                executed_tools = excluded.executed_tools,
                updated_at = excluded.updated_at",
            params![
                conversation.id(),
                phase_name(conversation.phase()),
                serde_json::to_string(conversation.properties())?,
                serde_json::to_string(conversation.usage())?,
                serde_json::to_string(conversation.executed_tools())?,
                now,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO messages (conversation_id, message_id, sequence_id, role, content, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(conversation_id, message_id) DO UPDATE SET is_active = excluded.is_active",
            )?;
            for (sequence_id, message) in conversation.messages().iter().enumerate() {
                stmt.execute(params![
                    conversation.id(),
                    message.id,
                    i64::try_from(sequence_id).map_err(|e| DbError::Corrupt(e.to_string()))?,
                    message.role.to_string(),
                    serde_json::to_string(&message.content)?,
                    message.is_active,
                    message.created_at.to_rfc3339(),
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            conv_id = %conversation.id(),
            phase = phase_name(conversation.phase()),
            messages = conversation.messages().len(),
            "Conversation saved"
        );
        Ok(())
    }

    /// Load a conversation snapshot
    pub fn load_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT phase, properties, usage, executed_tools FROM conversations WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        let Some((phase, properties, usage, executed_tools)) = row else {
            return Err(DbError::ConversationNotFound(id.to_string()));
        };

        let phase: ExecutionPhase = parse_phase(&phase)
            .ok_or_else(|| DbError::Corrupt(format!("unknown phase '{phase}' for {id}")))?;
        let properties: BTreeMap<String, String> = serde_json::from_str(&properties)?;

        let mut stmt = conn.prepare(
            "SELECT message_id, role, content, is_active, created_at
             FROM messages WHERE conversation_id = ?1 ORDER BY sequence_id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (message_id, role, content, is_active, created_at) = row?;
            let role: Role = role.parse().map_err(DbError::Corrupt)?;
            messages.push(ConversationMessage {
                id: message_id,
                role,
                content: serde_json::from_str(&content)?,
                is_active,
                created_at: parse_datetime(&created_at)?,
            });
        }

        Ok(Conversation::from_parts(
            id.to_string(),
            messages,
            phase,
            properties,
            serde_json::from_str(&usage)?,
            serde_json::from_str(&executed_tools)?,
        ))
    }

    /// Ids of conversations suspended on a client tool, most recent first
    pub fn list_awaiting_client(&self) -> DbResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM conversations WHERE phase = ?1 ORDER BY updated_at DESC",
        )?;
        let ids = stmt
            .query_map(params![phase_name(ExecutionPhase::AwaitingClient)], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Delete a conversation and its messages
    pub fn delete_conversation(&self, id: &str) -> DbResult<()> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("bad timestamp '{s}': {e}")))
}
