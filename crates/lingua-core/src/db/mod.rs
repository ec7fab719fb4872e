// ============================================================================
// ChatDb — Embedded Database (redb)
// ============================================================================
// Persistent local storage for sessions and conversation messages.
// Default path: ~/.lingua/chat.redb (override via LINGUA_DB_PATH env var)
// ============================================================================

pub mod types;

pub use types::{DbStats, MessageRecord, MessageRole, SessionRecord};

use anyhow::{anyhow, Result};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// Table definitions. Session keys are zero-padded ids; message keys are
// "{session_id:020}:{message_id:020}" so a prefix range scan returns one
// session's turns in creation order.
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const MESSAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("messages");
const COUNTERS: TableDefinition<&str, i64> = TableDefinition::new("counters");

const SESSION_COUNTER: &str = "next_session_id";
const MESSAGE_COUNTER: &str = "next_message_id";

fn session_key(session_id: i64) -> String {
    format!("{:020}", session_id)
}

fn message_key(session_id: i64, message_id: i64) -> String {
    format!("{:020}:{:020}", session_id, message_id)
}

/// Embedded database for conversation history
pub struct ChatDb {
    db: Database,
    path: PathBuf,
}

impl ChatDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses LINGUA_DB_PATH env var or ~/.lingua/chat.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("LINGUA_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let lingua_dir = home.join(".lingua");
            std::fs::create_dir_all(&lingua_dir)
                .map_err(|e| anyhow!("Failed to create .lingua directory: {}", e))?;
            lingua_dir.join("chat.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(SESSIONS)
                .map_err(|e| anyhow!("Failed to create sessions table: {}", e))?;
            let _ = write_txn
                .open_table(MESSAGES)
                .map_err(|e| anyhow!("Failed to create messages table: {}", e))?;
            let _ = write_txn
                .open_table(COUNTERS)
                .map_err(|e| anyhow!("Failed to create counters table: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        info!("Database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Session Operations
    // ========================================================================

    /// Create a new session, assigning the next id atomically with the insert.
    pub fn create_session(
        &self,
        agent_id: i64,
        user_id: &str,
        display_name: &str,
    ) -> Result<SessionRecord> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;

        let session;
        {
            let mut counters = write_txn
                .open_table(COUNTERS)
                .map_err(|e| anyhow!("Failed to open counters table: {}", e))?;
            let id = counters
                .get(SESSION_COUNTER)
                .map_err(|e| anyhow!("Failed to read session counter: {}", e))?
                .map(|v| v.value())
                .unwrap_or(1);
            counters
                .insert(SESSION_COUNTER, id + 1)
                .map_err(|e| anyhow!("Failed to bump session counter: {}", e))?;

            session = SessionRecord {
                id,
                agent_id,
                user_id: user_id.to_string(),
                display_name: display_name.to_string(),
                created_at: chrono::Utc::now().timestamp(),
            };

            let value = bincode::serialize(&session)
                .map_err(|e| anyhow!("Failed to serialize session: {}", e))?;
            let mut table = write_txn
                .open_table(SESSIONS)
                .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;
            table
                .insert(session_key(id).as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert session: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Created session {} for user {}", session.id, user_id);
        Ok(session)
    }

    pub fn get_session(&self, session_id: i64) -> Result<Option<SessionRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(SESSIONS)
            .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;

        match table
            .get(session_key(session_id).as_str())
            .map_err(|e| anyhow!("Failed to get session: {}", e))?
        {
            Some(value) => {
                let session: SessionRecord = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize session: {}", e))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Most recently created session for an (agent, user) pair, if any.
    pub fn latest_session(&self, agent_id: i64, user_id: &str) -> Result<Option<SessionRecord>> {
        let sessions = self.list_sessions()?;
        Ok(sessions
            .into_iter()
            .filter(|s| s.agent_id == agent_id && s.user_id == user_id)
            .max_by_key(|s| s.id))
    }

    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(SESSIONS)
            .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate sessions: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let session: SessionRecord = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize session: {}", e))?;
            results.push(session);
        }
        Ok(results)
    }

    /// Update the display name. The only mutable session field.
    pub fn rename_session(&self, session_id: i64, display_name: &str) -> Result<()> {
        let mut session = self
            .get_session(session_id)?
            .ok_or_else(|| anyhow!("Session not found: {}", session_id))?;
        session.display_name = display_name.to_string();

        let value = bincode::serialize(&session)
            .map_err(|e| anyhow!("Failed to serialize session: {}", e))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(SESSIONS)
                .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;
            table
                .insert(session_key(session_id).as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to update session: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Renamed session {} to '{}'", session_id, display_name);
        Ok(())
    }

    pub fn delete_session(&self, session_id: i64) -> Result<bool> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn
                .open_table(SESSIONS)
                .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;
            removed = table
                .remove(session_key(session_id).as_str())
                .map_err(|e| anyhow!("Failed to remove session: {}", e))?
                .is_some();

            let mut messages = write_txn
                .open_table(MESSAGES)
                .map_err(|e| anyhow!("Failed to open messages table: {}", e))?;
            let prefix = format!("{:020}:", session_id);
            let upper = format!("{:020};", session_id); // ';' sorts just after ':'
            let keys: Vec<String> = {
                let iter = messages
                    .range(prefix.as_str()..upper.as_str())
                    .map_err(|e| anyhow!("Failed to iterate messages: {}", e))?;
                let mut keys = Vec::new();
                for entry in iter {
                    let (key, _value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
                    keys.push(key.value().to_string());
                }
                keys
            };
            for key in keys {
                messages
                    .remove(key.as_str())
                    .map_err(|e| anyhow!("Failed to remove message: {}", e))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            debug!("Deleted session: {}", session_id);
        }
        Ok(removed)
    }

    // ========================================================================
    // Message Operations
    // ========================================================================

    /// Append a message to a session, assigning id and timestamp.
    /// Messages are append-only; there is no update path.
    pub fn append_message(
        &self,
        session_id: i64,
        role: MessageRole,
        content: &str,
        raw_request: Option<String>,
        raw_response: Option<String>,
    ) -> Result<MessageRecord> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;

        let message;
        {
            let mut counters = write_txn
                .open_table(COUNTERS)
                .map_err(|e| anyhow!("Failed to open counters table: {}", e))?;
            let id = counters
                .get(MESSAGE_COUNTER)
                .map_err(|e| anyhow!("Failed to read message counter: {}", e))?
                .map(|v| v.value())
                .unwrap_or(1);
            counters
                .insert(MESSAGE_COUNTER, id + 1)
                .map_err(|e| anyhow!("Failed to bump message counter: {}", e))?;

            message = MessageRecord {
                id,
                session_id,
                role,
                content: content.to_string(),
                raw_request,
                raw_response,
                created_at: chrono::Utc::now().timestamp(),
            };

            let value = bincode::serialize(&message)
                .map_err(|e| anyhow!("Failed to serialize message: {}", e))?;
            let mut table = write_txn
                .open_table(MESSAGES)
                .map_err(|e| anyhow!("Failed to open messages table: {}", e))?;
            table
                .insert(message_key(session_id, id).as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert message: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!(
            "Appended {} message {} to session {}",
            message.role.as_str(),
            message.id,
            session_id
        );
        Ok(message)
    }

    /// Full ordered message set for a session, oldest first.
    pub fn session_messages(&self, session_id: i64) -> Result<Vec<MessageRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(MESSAGES)
            .map_err(|e| anyhow!("Failed to open messages table: {}", e))?;

        let prefix = format!("{:020}:", session_id);
        let upper = format!("{:020};", session_id);

        let mut results = Vec::new();
        let iter = table
            .range(prefix.as_str()..upper.as_str())
            .map_err(|e| anyhow!("Failed to iterate messages: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let message: MessageRecord = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize message: {}", e))?;
            results.push(message);
        }
        Ok(results)
    }

    pub fn message_count(&self, session_id: i64) -> Result<usize> {
        Ok(self.session_messages(session_id)?.len())
    }

    // ========================================================================
    // Stats & Pruning (inspection CLI)
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;

        let sessions = read_txn
            .open_table(SESSIONS)
            .map_err(|e| anyhow!("Failed to open sessions table: {}", e))?;
        let messages = read_txn
            .open_table(MESSAGES)
            .map_err(|e| anyhow!("Failed to open messages table: {}", e))?;

        Ok(DbStats {
            total_sessions: sessions
                .len()
                .map_err(|e| anyhow!("Failed to count sessions: {}", e))? as usize,
            total_messages: messages
                .len()
                .map_err(|e| anyhow!("Failed to count messages: {}", e))? as usize,
        })
    }

    /// Prune sessions created more than the given number of days ago,
    /// along with their messages. Returns the number of sessions deleted.
    pub fn prune_old_sessions(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - (older_than_days * 86400);
        let sessions = self.list_sessions()?;

        let mut deleted = 0;
        for session in &sessions {
            if session.created_at < cutoff && self.delete_session(session.id)? {
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!("Pruned {} sessions older than {} days", deleted, older_than_days);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
pub(crate) fn temp_db() -> ChatDb {
    let path = std::env::temp_dir().join(format!("lingua-test-{}.redb", uuid::Uuid::new_v4()));
    ChatDb::open(Some(path.to_str().unwrap())).unwrap()
}
