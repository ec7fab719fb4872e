//! ============================================================================
//! Completion Invoker - Chat completions via an OpenAI-compatible API
//! ============================================================================
//! Sends the assembled message list to the model provider and returns the
//! primary reply text plus raw request/response payloads for audit. Provider
//! failures are classified into a typed taxonomy; no internal retries.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ChatError, ModelFailureKind};

/// Default API endpoint for chat completions
const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";

/// One role-tagged message in a provider chat payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: String) -> Self {
        Self {
            role: "system".to_string(),
            content,
        }
    }

    pub fn user(content: String) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// Assembled request for one model call.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Successful model call: the primary reply text plus both raw payloads.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub response_text: String,
    pub raw_request: String,
    pub raw_response: String,
}

/// Seam for the model provider, mockable in tests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionOutcome, ChatError>;
}

/// reqwest-based client for an OpenAI-compatible /chat/completions endpoint.
pub struct CompletionClient {
    client: reqwest::Client,
    base_url: String,
}

impl CompletionClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for CompletionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for CompletionClient {
    async fn complete(
        &self,
        credential: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionOutcome, ChatError> {
        let raw_request = serde_json::to_string(request).map_err(|e| ChatError::ModelInvocation {
            kind: ModelFailureKind::MalformedRequest,
            message: format!("Failed to serialize request: {}", e),
        })?;

        debug!(
            "Calling chat completions: model {} with {} messages",
            request.model,
            request.messages.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", credential))
            .header("Content-Type", "application/json")
            .body(raw_request.clone())
            .send()
            .await
            .map_err(|e| ChatError::ModelInvocation {
                kind: ModelFailureKind::ProviderUnavailable,
                message: format!("Failed to reach provider: {}", e),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ChatError::ModelInvocation {
                kind: ModelFailureKind::ProviderUnavailable,
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            let message = parse_error_message(&body)
                .unwrap_or_else(|| format!("Provider error {}: {}", status, body));
            return Err(ChatError::ModelInvocation {
                kind: classify_status(status.as_u16()),
                message,
            });
        }

        let completion: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ChatError::ModelInvocation {
                kind: ModelFailureKind::Unknown,
                message: format!("Failed to parse completion response: {}", e),
            })?;

        // A turn with no reply has nothing to persist or show; surface it.
        let response_text = completion
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .filter(|text| !text.trim().is_empty())
            .ok_or(ChatError::NoModelResponse)?;

        Ok(CompletionOutcome {
            response_text,
            raw_request,
            raw_response: body,
        })
    }
}

/// Map a provider HTTP status onto the failure taxonomy.
pub fn classify_status(status: u16) -> ModelFailureKind {
    match status {
        401 | 403 => ModelFailureKind::InvalidCredential,
        429 => ModelFailureKind::RateLimited,
        400 | 404 | 413 | 422 => ModelFailureKind::MalformedRequest,
        500..=599 => ModelFailureKind::ProviderUnavailable,
        _ => ModelFailureKind::Unknown,
    }
}

fn parse_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .map(|e| e.error.message)
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(401), ModelFailureKind::InvalidCredential);
        assert_eq!(classify_status(403), ModelFailureKind::InvalidCredential);
        assert_eq!(classify_status(429), ModelFailureKind::RateLimited);
        assert_eq!(classify_status(400), ModelFailureKind::MalformedRequest);
        assert_eq!(classify_status(422), ModelFailureKind::MalformedRequest);
        assert_eq!(classify_status(500), ModelFailureKind::ProviderUnavailable);
        assert_eq!(classify_status(503), ModelFailureKind::ProviderUnavailable);
        assert_eq!(classify_status(418), ModelFailureKind::Unknown);
    }

    #[test]
    fn test_parse_error_message() {
        let body = r#"{"error":{"message":"Incorrect API key provided"}}"#;
        assert_eq!(
            parse_error_message(body).as_deref(),
            Some("Incorrect API key provided")
        );
        assert!(parse_error_message("not json").is_none());
    }

    #[test]
    fn test_request_serialization_skips_absent_fields() {
        let request = CompletionRequest {
            model: "grok-3-mini".to_string(),
            messages: vec![ChatMessage::user("hi".to_string())],
            temperature: None,
            max_tokens: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("temperature"));
        assert!(!json.contains("max_tokens"));
    }
}
