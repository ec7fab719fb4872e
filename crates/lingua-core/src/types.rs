//! ============================================================================
//! Core Types for the Lingua Pipeline
//! ============================================================================
//! Defines the turn request/outcome contract exchanged with outer layers and
//! the caller-visible error taxonomy. These types are serialized to JSON for
//! the HTTP/UI collaborators that sit above this crate.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// One chat turn request, handed to the pipeline with already-validated
/// identity and credential data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub agent_id: i64,
    pub user_id: String,
    pub message: String,
    /// Explicit session to continue; when absent the most recent session
    /// for (agent, user) is used, created on first contact.
    #[serde(default)]
    pub session_id: Option<i64>,
    /// Opaque provider credential. Absence fails the turn before any
    /// retrieval or model work.
    #[serde(default)]
    pub credential: Option<String>,
}

/// Session identity returned alongside a turn result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    pub name: String,
}

/// A single word-level translation extracted from an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTranslation {
    pub original_word: String,
    pub translation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence_context: Option<String>,
}

/// Result of a completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// Assistant reply with any trailing structured block stripped.
    pub response: String,
    pub session: SessionSummary,
    /// Raw request payload sent to the model provider, for audit.
    pub raw_request: String,
    /// Raw completion payload returned by the provider, for audit.
    pub raw_response: String,
    pub user_message_id: i64,
    pub assistant_message_id: i64,
    /// Full-sentence translation. Populated only for language-assistant
    /// personas; general personas never carry it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_translations: Option<Vec<WordTranslation>>,
}

/// Classified model-provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFailureKind {
    InvalidCredential,
    RateLimited,
    MalformedRequest,
    ProviderUnavailable,
    Unknown,
}

impl std::fmt::Display for ModelFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelFailureKind::InvalidCredential => "invalid_credential",
            ModelFailureKind::RateLimited => "rate_limited",
            ModelFailureKind::MalformedRequest => "malformed_request",
            ModelFailureKind::ProviderUnavailable => "provider_unavailable",
            ModelFailureKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Fatal pipeline errors. Everything not listed here degrades in place:
/// memory retrieval, translation extraction, and consolidation failures are
/// logged and the turn still produces a saved assistant reply.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum ChatError {
    #[error("Model credential required")]
    CredentialMissing,

    #[error("Agent not found: {0}")]
    AgentNotFound(i64),

    #[error("Session not found: {0}")]
    SessionNotFound(i64),

    #[error("Model invocation failed ({kind}): {message}")]
    ModelInvocation {
        kind: ModelFailureKind,
        message: String,
    },

    #[error("Model returned no usable response")]
    NoModelResponse,

    #[error("Storage failure: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::ModelInvocation {
            kind: ModelFailureKind::RateLimited,
            message: "429 from provider".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Model invocation failed (rate_limited): 429 from provider"
        );
    }

    #[test]
    fn test_turn_request_defaults() {
        let json = r#"{"agent_id":1,"user_id":"u1","message":"hi"}"#;
        let req: TurnRequest = serde_json::from_str(json).unwrap();
        assert!(req.session_id.is_none());
        assert!(req.credential.is_none());
    }

    #[test]
    fn test_outcome_omits_absent_translation() {
        let outcome = TurnOutcome {
            response: "hi".to_string(),
            session: SessionSummary {
                id: 1,
                name: "Chat".to_string(),
            },
            raw_request: "{}".to_string(),
            raw_response: "{}".to_string(),
            user_message_id: 1,
            assistant_message_id: 2,
            translation: None,
            word_translations: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(!json.contains("translation"));
    }
}
