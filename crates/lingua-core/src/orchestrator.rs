//! ============================================================================
//! Turn Orchestrator - One pipeline invocation per user message
//! ============================================================================
//! Sequence: resolve session -> read history -> retrieve memory -> assemble
//! context -> persist user turn -> invoke model -> extract translations ->
//! persist assistant turn -> consolidate memory.
//!
//! Failure policy: credential/agent/session resolution and the model call
//! are fatal; everything after a reply exists degrades. The user turn is
//! persisted before the model call so a failed invocation still leaves an
//! audit trail, and the assistant turn is persisted regardless of how the
//! extraction and memory steps fare.
//! ============================================================================

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::{AgentKind, AgentRegistry};
use crate::completion::{ChatBackend, CompletionRequest};
use crate::context::assemble_context;
use crate::db::{ChatDb, MessageRole};
use crate::memory::{
    ConsolidationQueue, Embedder, MemoryConsolidator, MemoryRetriever, MemoryScope, MemoryStore,
    SummarizeJob, DEFAULT_THRESHOLD, DEFAULT_TOP_K,
};
use crate::session::SessionResolver;
use crate::translation::extract_translations;
use crate::types::{ChatError, SessionSummary, TurnOutcome, TurnRequest};

/// Capacity of the summarization handoff queue.
const QUEUE_CAPACITY: usize = 16;

/// The top-level coordinator for chat turns.
pub struct ChatPipeline {
    db: Arc<ChatDb>,
    agents: AgentRegistry,
    resolver: SessionResolver,
    retriever: MemoryRetriever,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatBackend>,
    consolidator: Arc<MemoryConsolidator>,
    summarize_queue: ConsolidationQueue,
}

impl ChatPipeline {
    /// Wire up the pipeline and spawn the summarization worker.
    /// Must be called from within a tokio runtime.
    pub fn new(
        db: Arc<ChatDb>,
        agents: AgentRegistry,
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatBackend>,
    ) -> Self {
        let consolidator = Arc::new(MemoryConsolidator::new(
            store.clone(),
            embedder.clone(),
            chat.clone(),
        ));
        let summarize_queue = ConsolidationQueue::spawn(consolidator.clone(), QUEUE_CAPACITY);

        Self {
            db: db.clone(),
            agents,
            resolver: SessionResolver::new(db),
            retriever: MemoryRetriever::new(store),
            embedder,
            chat,
            consolidator,
            summarize_queue,
        }
    }

    /// Process one user message end to end.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, ChatError> {
        // Pre-flight: no credential means no retrieval, no model work, and
        // nothing persisted.
        let credential = request
            .credential
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(ChatError::CredentialMissing)?;

        let agent = self.agents.get(request.agent_id)?.clone();

        let session =
            self.resolver
                .resolve(request.agent_id, &request.user_id, request.session_id)?;
        debug!(
            "Turn for agent {} / user {} in session {}",
            agent.id, request.user_id, session.id
        );

        let history = self
            .db
            .session_messages(session.id)
            .map_err(|e| ChatError::Storage(e.to_string()))?;
        // Session turn count as of this user message. Consolidation runs
        // after the assistant turn is stored but triggers on this count, so
        // the first message of a fresh session fires immediately.
        let user_turn_count = history.len() + 1;

        let scope = MemoryScope::new(request.agent_id, request.user_id.clone());
        let memories = self.retrieve_memories(&scope, &request.message).await;

        let messages = assemble_context(&agent, &history, &memories, &request.message);

        // Persist the user turn before invoking the model: a failed call
        // still leaves a record of what was asked.
        let user_message = self
            .db
            .append_message(session.id, MessageRole::User, &request.message, None, None)
            .map_err(|e| ChatError::Storage(e.to_string()))?;

        let completion_request = CompletionRequest {
            model: agent.model.clone(),
            messages,
            temperature: Some(agent.temperature),
            max_tokens: agent.max_tokens,
        };

        let completion = self.chat.complete(credential, &completion_request).await?;

        // Extraction never fails the turn; a malformed block just leaves
        // the reply untouched.
        let extraction = extract_translations(&completion.response_text);

        let assistant_message = self
            .db
            .append_message(
                session.id,
                MessageRole::Assistant,
                &extraction.cleaned_response,
                Some(completion.raw_request.clone()),
                Some(completion.raw_response.clone()),
            )
            .map_err(|e| ChatError::Storage(e.to_string()))?;

        self.consolidate(
            &scope,
            session.id,
            &session.display_name,
            user_turn_count,
            credential,
        )
        .await;

        let language_assistant = agent.kind == AgentKind::LanguageAssistant;
        info!(
            "Turn complete: session {} message {} -> {}",
            session.id, user_message.id, assistant_message.id
        );

        Ok(TurnOutcome {
            response: extraction.cleaned_response,
            session: SessionSummary {
                id: session.id,
                name: session.display_name,
            },
            raw_request: completion.raw_request,
            raw_response: completion.raw_response,
            user_message_id: user_message.id,
            assistant_message_id: assistant_message.id,
            translation: if language_assistant {
                extraction.full_translation
            } else {
                None
            },
            word_translations: if language_assistant && extraction.extracted {
                Some(extraction.words)
            } else {
                None
            },
        })
    }

    /// Embed the user message and retrieve relevant memories. Degrades to
    /// an empty set on any failure.
    async fn retrieve_memories(
        &self,
        scope: &MemoryScope,
        message: &str,
    ) -> Vec<crate::memory::MemoryEntry> {
        let query = match self.embedder.embed_single(message).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(
                    "Query embedding failed for agent {} / user {}: {}",
                    scope.agent_id, scope.user_id, e
                );
                return Vec::new();
            }
        };

        self.retriever
            .find_similar(&query, scope, DEFAULT_TOP_K, DEFAULT_THRESHOLD)
            .await
            .into_iter()
            .map(|scored| scored.entry)
            .collect()
    }

    /// Conditional memory creation, then a fire-and-forget summarization
    /// handoff. Nothing here can fail the turn.
    async fn consolidate(
        &self,
        scope: &MemoryScope,
        session_id: i64,
        session_name: &str,
        user_turn_count: usize,
        credential: &str,
    ) {
        let turns = match self.db.session_messages(session_id) {
            Ok(turns) => turns,
            Err(e) => {
                warn!("Skipping consolidation, transcript read failed: {}", e);
                return;
            }
        };

        self.consolidator
            .maybe_create_memory(
                scope,
                session_id,
                session_name,
                user_turn_count,
                &turns,
                credential,
            )
            .await;

        if self.consolidator.maybe_summarize(scope).await {
            self.summarize_queue.enqueue(SummarizeJob {
                scope: scope.clone(),
                credential: credential.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{test_agent, AgentConfig};
    use crate::completion::CompletionOutcome;
    use crate::db::temp_db;
    use crate::memory::store::testing::InMemoryStore;
    use crate::types::ModelFailureKind;
    use anyhow::anyhow;
    use async_trait::async_trait;

    struct ScriptedChat {
        reply: Option<String>,
    }

    impl ScriptedChat {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { reply: None })
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedChat {
        async fn complete(
            &self,
            _credential: &str,
            request: &CompletionRequest,
        ) -> Result<CompletionOutcome, ChatError> {
            match &self.reply {
                Some(reply) => Ok(CompletionOutcome {
                    response_text: reply.clone(),
                    raw_request: serde_json::to_string(request).unwrap(),
                    raw_response: format!(
                        "{{\"choices\":[{{\"message\":{{\"content\":{}}}}}]}}",
                        serde_json::to_string(reply).unwrap()
                    ),
                }),
                None => Err(ChatError::ModelInvocation {
                    kind: ModelFailureKind::ProviderUnavailable,
                    message: "provider down".to_string(),
                }),
            }
        }
    }

    struct HashEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(anyhow!("embedding service down"));
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn pipeline_with(agent: AgentConfig, chat: Arc<ScriptedChat>) -> ChatPipeline {
        ChatPipeline::new(
            Arc::new(temp_db()),
            AgentRegistry::new(vec![agent]),
            Arc::new(InMemoryStore::new()),
            Arc::new(HashEmbedder { fail: false }),
            chat,
        )
    }

    fn request(agent_id: i64, message: &str) -> TurnRequest {
        TurnRequest {
            agent_id,
            user_id: "user-a".to_string(),
            message: message.to_string(),
            session_id: None,
            credential: Some("test-key".to_string()),
        }
    }

    #[tokio::test]
    async fn test_first_turn_general_persona() {
        let pipeline = pipeline_with(
            test_agent(1, AgentKind::General),
            ScriptedChat::replying("Hello! How can I help?"),
        );

        let outcome = pipeline.run_turn(request(1, "Hello")).await.unwrap();

        assert_eq!(outcome.response, "Hello! How can I help?");
        assert!(!outcome.response.is_empty());
        assert!(outcome.user_message_id > 0);
        assert!(outcome.assistant_message_id > 0);
        assert_ne!(outcome.user_message_id, outcome.assistant_message_id);
        assert!(outcome.translation.is_none());
        assert!(outcome.word_translations.is_none());

        // A session was created and both turns stored in order.
        let session = pipeline.db.get_session(outcome.session.id).unwrap().unwrap();
        assert_eq!(session.agent_id, 1);
        let messages = pipeline.db.session_messages(session.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert!(messages[1].raw_request.is_some());
        assert!(messages[1].raw_response.is_some());
        assert!(messages[0].raw_request.is_none());
    }

    #[tokio::test]
    async fn test_language_assistant_gets_translations() {
        let reply = "你好！\n\n{\"words\":[{\"originalWord\":\"你好\",\"translation\":\"hello\"}],\"fullTranslation\":\"Hello!\"}";
        let pipeline = pipeline_with(
            test_agent(1, AgentKind::LanguageAssistant),
            ScriptedChat::replying(reply),
        );

        let outcome = pipeline.run_turn(request(1, "Say hi")).await.unwrap();

        assert_eq!(outcome.response, "你好！");
        assert_eq!(outcome.translation.as_deref(), Some("Hello!"));
        let words = outcome.word_translations.unwrap();
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].original_word, "你好");

        // The stored assistant turn carries the cleaned text.
        let messages = pipeline.db.session_messages(outcome.session.id).unwrap();
        assert_eq!(messages[1].content, "你好！");
    }

    #[tokio::test]
    async fn test_general_persona_never_gets_translations() {
        // Even when the model emits a block, a general persona drops it
        // from the outcome (the text is still cleaned).
        let reply = "Hola\n\n{\"words\":[{\"originalWord\":\"hola\",\"translation\":\"hi\"}],\"fullTranslation\":\"Hi\"}";
        let pipeline = pipeline_with(test_agent(1, AgentKind::General), ScriptedChat::replying(reply));

        let outcome = pipeline.run_turn(request(1, "hey")).await.unwrap();
        assert_eq!(outcome.response, "Hola");
        assert!(outcome.translation.is_none());
        assert!(outcome.word_translations.is_none());
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_persisting() {
        let pipeline = pipeline_with(
            test_agent(1, AgentKind::General),
            ScriptedChat::replying("never reached"),
        );

        let mut req = request(1, "Hello");
        req.credential = None;
        let err = pipeline.run_turn(req).await.unwrap_err();
        assert!(matches!(err, ChatError::CredentialMissing));

        let stats = pipeline.db.stats().unwrap();
        assert_eq!(stats.total_sessions, 0);
        assert_eq!(stats.total_messages, 0);
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let pipeline = pipeline_with(
            test_agent(1, AgentKind::General),
            ScriptedChat::replying("hi"),
        );
        let err = pipeline.run_turn(request(42, "Hello")).await.unwrap_err();
        assert!(matches!(err, ChatError::AgentNotFound(42)));
    }

    #[tokio::test]
    async fn test_model_failure_keeps_user_turn() {
        let pipeline = pipeline_with(test_agent(1, AgentKind::General), ScriptedChat::failing());

        let err = pipeline.run_turn(request(1, "Hello")).await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::ModelInvocation {
                kind: ModelFailureKind::ProviderUnavailable,
                ..
            }
        ));

        // Audit trail: the question was persisted, no assistant turn was.
        let sessions = pipeline.db.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        let messages = pipeline.db.session_messages(sessions[0].id).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_no_memory() {
        let pipeline = ChatPipeline::new(
            Arc::new(temp_db()),
            AgentRegistry::new(vec![test_agent(1, AgentKind::General)]),
            Arc::new(InMemoryStore::new()),
            Arc::new(HashEmbedder { fail: true }),
            ScriptedChat::replying("Still works"),
        );

        let outcome = pipeline.run_turn(request(1, "Hello")).await.unwrap();
        assert_eq!(outcome.response, "Still works");
    }

    #[tokio::test]
    async fn test_first_turn_creates_memory() {
        // The reply doubles as the key-point extraction output.
        let store = Arc::new(InMemoryStore::new());
        let pipeline = ChatPipeline::new(
            Arc::new(temp_db()),
            AgentRegistry::new(vec![test_agent(1, AgentKind::General)]),
            store.clone(),
            Arc::new(HashEmbedder { fail: false }),
            ScriptedChat::replying(r#"["User opened with a greeting"]"#),
        );
        let scope = MemoryScope::new(1, "user-a");

        // Message 1 of a fresh session fires consolidation even though the
        // transcript holds both turns by the time it runs.
        pipeline.run_turn(request(1, "Hello")).await.unwrap();
        assert_eq!(store.count(&scope).await.unwrap(), 1);

        // Messages 3, 5, 7, 9 are off-interval.
        for message in ["two", "three", "four", "five"] {
            pipeline.run_turn(request(1, message)).await.unwrap();
        }
        assert_eq!(store.count(&scope).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_session_continuity_across_turns() {
        let pipeline = pipeline_with(
            test_agent(1, AgentKind::General),
            ScriptedChat::replying("reply"),
        );

        let first = pipeline.run_turn(request(1, "one")).await.unwrap();
        let second = pipeline.run_turn(request(1, "two")).await.unwrap();

        assert_eq!(first.session.id, second.session.id);
        let messages = pipeline.db.session_messages(first.session.id).unwrap();
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn test_explicit_unknown_session_rejected() {
        let pipeline = pipeline_with(
            test_agent(1, AgentKind::General),
            ScriptedChat::replying("reply"),
        );

        let mut req = request(1, "Hello");
        req.session_id = Some(777);
        let err = pipeline.run_turn(req).await.unwrap_err();
        assert!(matches!(err, ChatError::SessionNotFound(777)));
    }
}
