//! ============================================================================
//! Session Resolver - Find-or-create the active conversation session
//! ============================================================================
//! One active session per (agent, user) by convention: the most recently
//! created one. A benign race creating two sessions for a brand-new user
//! self-heals on the next call, which picks the most recent.
//! ============================================================================

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::{ChatDb, SessionRecord};
use crate::types::ChatError;

/// Default display name for sessions created implicitly on first contact.
const DEFAULT_SESSION_NAME: &str = "New Conversation";

pub struct SessionResolver {
    db: Arc<ChatDb>,
}

impl SessionResolver {
    pub fn new(db: Arc<ChatDb>) -> Self {
        Self { db }
    }

    /// Resolve the session for a turn.
    ///
    /// With an explicit id, the session must exist, belong to the user, and
    /// belong to the requested agent; a mismatched agent is treated as
    /// not-found to prevent continuing another agent's session. Without an
    /// id, the most recent session for the pair is used, created when none
    /// exists.
    pub fn resolve(
        &self,
        agent_id: i64,
        user_id: &str,
        session_id: Option<i64>,
    ) -> Result<SessionRecord, ChatError> {
        if let Some(id) = session_id {
            let session = self
                .db
                .get_session(id)
                .map_err(|e| ChatError::Storage(e.to_string()))?
                .ok_or(ChatError::SessionNotFound(id))?;

            if session.user_id != user_id || session.agent_id != agent_id {
                debug!(
                    "Session {} belongs to agent {} / user {}, rejected for agent {} / user {}",
                    id, session.agent_id, session.user_id, agent_id, user_id
                );
                return Err(ChatError::SessionNotFound(id));
            }
            return Ok(session);
        }

        if let Some(session) = self
            .db
            .latest_session(agent_id, user_id)
            .map_err(|e| ChatError::Storage(e.to_string()))?
        {
            return Ok(session);
        }

        let session = self
            .db
            .create_session(agent_id, user_id, DEFAULT_SESSION_NAME)
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        info!(
            "Created session {} for agent {} / user {}",
            session.id, agent_id, user_id
        );
        Ok(session)
    }
}
