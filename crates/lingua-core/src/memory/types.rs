//! ============================================================================
//! Memory Types - Durable key points for long-term personalization
//! ============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scope for memory storage and retrieval. Entries never leak across
/// (agent, user) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    pub agent_id: i64,
    pub user_id: String,
}

impl MemoryScope {
    pub fn new(agent_id: i64, user_id: impl Into<String>) -> Self {
        Self {
            agent_id,
            user_id: user_id.into(),
        }
    }
}

/// Lightweight provenance carried on entries created from a session
/// transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub session_id: i64,
    pub session_name: String,
    pub message_count: usize,
}

/// A single durable memory entry stored in the vector database.
/// Created only by consolidation; read-only to the turn pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub agent_id: i64,
    pub user_id: String,
    /// The distilled fact about the user.
    pub key_point: String,
    /// Fixed-dimensionality embedding of the key point.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub vector: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<MemoryContext>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MemoryEntry {
    pub fn new(agent_id: i64, user_id: String, key_point: String, vector: Vec<f32>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4(),
            agent_id,
            user_id,
            key_point,
            vector,
            context: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_context(mut self, context: MemoryContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn scope(&self) -> MemoryScope {
        MemoryScope::new(self.agent_id, self.user_id.clone())
    }
}

/// A retrieved entry paired with its similarity to the query vector.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub entry: MemoryEntry,
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_construction() {
        let entry = MemoryEntry::new(1, "user-a".to_string(), "Likes tea".to_string(), vec![0.1; 4])
            .with_context(MemoryContext {
                session_id: 7,
                session_name: "Morning chat".to_string(),
                message_count: 10,
            });

        assert_eq!(entry.scope(), MemoryScope::new(1, "user-a"));
        assert_eq!(entry.context.as_ref().unwrap().session_id, 7);
        assert_eq!(entry.created_at, entry.updated_at);
    }
}
