//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};

/// A conversation session between one user and one agent persona.
/// Immutable after creation except for the display name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub agent_id: i64,
    pub user_id: String,
    pub display_name: String,
    pub created_at: i64,
}

/// Message role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Wire name used in provider chat payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

/// One stored conversation turn. Append-only; never mutated once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    /// Raw provider request, retained only on the turn that produced it.
    pub raw_request: Option<String>,
    /// Raw provider response, retained only on the turn that produced it.
    pub raw_response: Option<String>,
    pub created_at: i64,
}

/// Database statistics for the inspection CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub total_sessions: usize,
    pub total_messages: usize,
}
