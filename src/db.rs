//! Local SQLite store
//!
//! Holds the per-user display-name preference and, when history is kept
//! locally, the conversation directory and the exchange log.

mod schema;

pub use schema::*;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
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

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        self.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Conversation Operations ====================

    /// Create a new conversation
    pub fn create_conversation(
        &self,
        id: &str,
        owner_id: &str,
        title: &str,
    ) -> DbResult<Conversation> {
        let conn = self.lock();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO conversations (id, owner_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, owner_id, title, now.to_rfc3339()],
        )?;

        Ok(Conversation {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, title, created_at, updated_at FROM conversations WHERE id = ?1",
        )?;

        stmt.query_row(params![id], parse_conversation_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DbError::ConversationNotFound(id.to_string())
                }
                other => DbError::Sqlite(other),
            })
    }

    /// List an owner's conversations, newest first
    pub fn list_conversations(&self, owner_id: &str) -> DbResult<Vec<Conversation>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, title, created_at, updated_at
             FROM conversations
             WHERE owner_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;

        let rows = stmt.query_map(params![owner_id], parse_conversation_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Rename a conversation and return the stored record
    pub fn rename_conversation(&self, id: &str, title: &str) -> DbResult<Conversation> {
        {
            let conn = self.lock();
            let updated = conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, Utc::now().to_rfc3339(), id],
            )?;

            if updated == 0 {
                return Err(DbError::ConversationNotFound(id.to_string()));
            }
        }
        self.get_conversation(id)
    }

    /// Delete a conversation and all its exchanges
    pub fn delete_conversation(&self, id: &str) -> DbResult<()> {
        let conn = self.lock();

        // Exchanges are deleted by CASCADE
        let deleted = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;

        if deleted == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        Ok(())
    }

    // ==================== Exchange Operations ====================

    /// Append a question/answer pair to a conversation
    pub fn add_exchange(&self, id: &str, exchange: &NewExchange) -> DbResult<Exchange> {
        let conn = self.lock();
        let now = Utc::now();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM conversations WHERE id = ?1)",
            params![exchange.conversation_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(DbError::ConversationNotFound(exchange.conversation_id.clone()));
        }

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM exchanges WHERE conversation_id = ?1",
            params![exchange.conversation_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO exchanges
             (id, conversation_id, owner_id, sequence_id, question, answer, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                exchange.conversation_id,
                exchange.owner_id,
                sequence_id,
                exchange.question,
                exchange.answer,
                exchange.confidence,
                now.to_rfc3339(),
            ],
        )?;

        conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), exchange.conversation_id],
        )?;

        Ok(Exchange {
            id: id.to_string(),
            conversation_id: exchange.conversation_id.clone(),
            owner_id: exchange.owner_id.clone(),
            question: exchange.question.clone(),
            answer: exchange.answer.clone(),
            confidence: exchange.confidence,
            created_at: now,
        })
    }

    /// Get a conversation's exchanges in the order they were stored
    pub fn get_exchanges(&self, conversation_id: &str) -> DbResult<Vec<Exchange>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, owner_id, question, answer, confidence, created_at
             FROM exchanges WHERE conversation_id = ?1 ORDER BY sequence_id ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(Exchange {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                owner_id: row.get(2)?,
                question: row.get(3)?,
                answer: row.get(4)?,
                confidence: row.get(5)?,
                created_at: parse_datetime(&row.get::<_, String>(6)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Preferences ====================

    /// Stored display name for a user, if one was ever set
    pub fn get_display_name(&self, user_id: &str) -> DbResult<Option<String>> {
        let conn = self.lock();
        let result = conn.query_row(
            "SELECT display_name FROM preferences WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        );

        match result {
            Ok(name) => Ok(Some(name)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    pub fn set_display_name(&self, user_id: &str, display_name: &str) -> DbResult<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO preferences (user_id, display_name, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE
             SET display_name = excluded.display_name, updated_at = excluded.updated_at",
            params![user_id, display_name, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

fn parse_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
