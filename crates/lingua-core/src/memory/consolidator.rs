//! ============================================================================
//! Memory Consolidator - Transcript distillation into durable memory
//! ============================================================================
//! Two jobs. Periodically (first message, then every Nth) a session's
//! recent transcript is distilled into key-point entries via the model.
//! Separately, once a scope's entry count passes a threshold, a batch of
//! the oldest entries is rewritten into fewer, denser ones. Both paths are
//! best-effort: every failure is logged and swallowed so the triggering
//! turn is never aborted. Summarization runs on a bounded queue consumed by
//! a background worker, decoupled from the reply path.
//! ============================================================================

use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::completion::{ChatBackend, ChatMessage, CompletionRequest};
use crate::db::MessageRecord;
use crate::memory::embeddings::Embedder;
use crate::memory::store::MemoryStore;
use crate::memory::types::{MemoryContext, MemoryEntry, MemoryScope};

/// Memory creation fires on the first message of a session, then on every
/// interval-th message of that session. Counted per session at the
/// triggering user message, not globally: an agent spread across many
/// short sessions consolidates less often than one long session (flagged
/// for product review, behavior kept).
pub const MEMORY_INTERVAL: usize = 10;

/// Scope entry count above which summarization triggers.
pub const SUMMARIZE_THRESHOLD: usize = 50;

/// Number of oldest entries compacted per summarization pass.
const SUMMARIZE_BATCH: usize = 30;

/// Transcript turns fed into one key-point extraction.
const EXTRACTION_WINDOW: usize = 2 * MEMORY_INTERVAL;

/// Model used for extraction and summarization calls.
const CONSOLIDATION_MODEL: &str = "grok-3-mini";

/// Whether memory creation should fire for a session at this turn count.
pub fn should_create_memory(message_count: usize, interval: usize) -> bool {
    message_count == 1 || (message_count > 0 && message_count % interval == 0)
}

pub struct MemoryConsolidator {
    store: Arc<dyn MemoryStore>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatBackend>,
}

impl MemoryConsolidator {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            store,
            embedder,
            chat,
        }
    }

    /// Distill the session transcript into memory entries when the interval
    /// trigger fires. Off-interval calls are no-ops. `message_count` is the
    /// session's turn count as of the triggering message; `turns` may
    /// already include the reply that followed it. Returns the number of
    /// entries created; failures are logged and reported as zero.
    pub async fn maybe_create_memory(
        &self,
        scope: &MemoryScope,
        session_id: i64,
        session_name: &str,
        message_count: usize,
        turns: &[MessageRecord],
        credential: &str,
    ) -> usize {
        if !should_create_memory(message_count, MEMORY_INTERVAL) {
            return 0;
        }

        match self
            .create_memory(scope, session_id, session_name, message_count, turns, credential)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                warn!(
                    "Memory creation failed for agent {} / user {} (session {}): {}",
                    scope.agent_id, scope.user_id, session_id, e
                );
                0
            }
        }
    }

    async fn create_memory(
        &self,
        scope: &MemoryScope,
        session_id: i64,
        session_name: &str,
        message_count: usize,
        turns: &[MessageRecord],
        credential: &str,
    ) -> Result<usize> {
        let transcript = render_transcript(turns, EXTRACTION_WINDOW);
        let key_points = self.extract_key_points(&transcript, credential).await?;

        // The model may legitimately find nothing worth remembering.
        if key_points.is_empty() {
            debug!("No key points extracted for session {}", session_id);
            return Ok(0);
        }

        let vectors = self.embedder.embed(&key_points).await?;
        if vectors.len() != key_points.len() {
            return Err(anyhow!(
                "Embedding count mismatch: {} texts, {} vectors",
                key_points.len(),
                vectors.len()
            ));
        }

        let mut created = 0;
        for (key_point, vector) in key_points.into_iter().zip(vectors) {
            let entry = MemoryEntry::new(scope.agent_id, scope.user_id.clone(), key_point, vector)
                .with_context(MemoryContext {
                    session_id,
                    session_name: session_name.to_string(),
                    message_count,
                });
            self.store.insert(&entry).await?;
            created += 1;
        }

        info!(
            "Created {} memory entries for agent {} / user {} from session {}",
            created, scope.agent_id, scope.user_id, session_id
        );
        Ok(created)
    }

    /// Ask the model for durable facts about the user, as a JSON array of
    /// short statements.
    async fn extract_key_points(&self, transcript: &str, credential: &str) -> Result<Vec<String>> {
        let prompt = format!(
            "You extract durable facts about a user from a conversation transcript.\n\
            Return a JSON array of short, self-contained statements worth remembering \
            long-term (names, preferences, goals, circumstances). Return [] if the \
            transcript contains nothing worth remembering. Respond with ONLY the JSON array.\n\n\
            Transcript:\n{}",
            transcript
        );

        let request = CompletionRequest {
            model: CONSOLIDATION_MODEL.to_string(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: Some(0.2),
            max_tokens: Some(1024),
        };

        let outcome = self
            .chat
            .complete(credential, &request)
            .await
            .map_err(|e| anyhow!("Key-point extraction call failed: {}", e))?;

        Ok(parse_key_points(&outcome.response_text))
    }

    /// Whether the scope has accumulated enough entries to warrant a
    /// summarization pass.
    pub async fn maybe_summarize(&self, scope: &MemoryScope) -> bool {
        match self.store.count(scope).await {
            Ok(count) => count > SUMMARIZE_THRESHOLD,
            Err(e) => {
                warn!(
                    "Memory count failed for agent {} / user {}: {}",
                    scope.agent_id, scope.user_id, e
                );
                false
            }
        }
    }

    /// Rewrite a batch of the oldest entries into fewer, denser ones.
    /// Operates on a snapshot: new entries are written before the old batch
    /// is deleted, so a concurrent turn at worst reads both. Returns the
    /// number of replacement entries written.
    pub async fn summarize(&self, scope: &MemoryScope, credential: &str) -> Result<usize> {
        let batch = self.store.oldest(scope, SUMMARIZE_BATCH).await?;
        if batch.len() < 2 {
            return Ok(0);
        }

        let listing: String = batch
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}. {}\n", i + 1, e.key_point))
            .collect();

        let prompt = format!(
            "The following notes about one user have accumulated over time. Rewrite \
            them as a smaller JSON array of denser statements, merging duplicates and \
            dropping trivia, while preserving every distinct durable fact. Respond with \
            ONLY the JSON array.\n\nNotes:\n{}",
            listing
        );

        let request = CompletionRequest {
            model: CONSOLIDATION_MODEL.to_string(),
            messages: vec![ChatMessage::user(prompt)],
            temperature: Some(0.2),
            max_tokens: Some(1024),
        };

        let outcome = self
            .chat
            .complete(credential, &request)
            .await
            .map_err(|e| anyhow!("Summarization call failed: {}", e))?;

        let summaries = parse_key_points(&outcome.response_text);
        if summaries.is_empty() {
            return Err(anyhow!("Summarization produced no entries"));
        }

        let vectors = self.embedder.embed(&summaries).await?;
        for (key_point, vector) in summaries.iter().zip(vectors) {
            let entry = MemoryEntry::new(
                scope.agent_id,
                scope.user_id.clone(),
                key_point.clone(),
                vector,
            );
            self.store.insert(&entry).await?;
        }

        let old_ids: Vec<_> = batch.iter().map(|e| e.id).collect();
        self.store.delete(&old_ids).await?;

        info!(
            "Summarized {} memory entries into {} for agent {} / user {}",
            old_ids.len(),
            summaries.len(),
            scope.agent_id,
            scope.user_id
        );
        Ok(summaries.len())
    }
}

/// Render the tail of a transcript for an extraction prompt.
fn render_transcript(turns: &[MessageRecord], window: usize) -> String {
    let start = turns.len().saturating_sub(window);
    turns[start..]
        .iter()
        .map(|t| format!("{}: {}\n", t.role.as_str(), t.content))
        .collect()
}

/// Tolerant parse of a JSON string array out of a model reply. The array
/// may be fenced or embedded in prose; non-string and empty elements are
/// dropped.
fn parse_key_points(text: &str) -> Vec<String> {
    let start = match text.find('[') {
        Some(idx) => idx,
        None => return Vec::new(),
    };
    let end = match text.rfind(']') {
        Some(idx) if idx > start => idx,
        _ => return Vec::new(),
    };

    let parsed: Value = match serde_json::from_str(&text[start..=end]) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };

    parsed
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Summarization queue
// ============================================================================

/// One queued summarization pass.
#[derive(Debug, Clone)]
pub struct SummarizeJob {
    pub scope: MemoryScope,
    pub credential: String,
}

/// Bounded handoff between the turn pipeline and the summarization worker.
/// The reply path only ever `try_send`s; a full queue drops the job with a
/// warning rather than blocking the reply.
#[derive(Clone)]
pub struct ConsolidationQueue {
    sender: mpsc::Sender<SummarizeJob>,
}

impl ConsolidationQueue {
    /// Spawn the background worker and return the queue handle.
    pub fn spawn(consolidator: Arc<MemoryConsolidator>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<SummarizeJob>(capacity);

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                debug!(
                    "Running summarization for agent {} / user {}",
                    job.scope.agent_id, job.scope.user_id
                );
                if let Err(e) = consolidator.summarize(&job.scope, &job.credential).await {
                    warn!(
                        "Summarization failed for agent {} / user {}: {}",
                        job.scope.agent_id, job.scope.user_id, e
                    );
                }
            }
        });

        Self { sender }
    }

    /// Enqueue without blocking. Returns whether the job was accepted.
    pub fn enqueue(&self, job: SummarizeJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(e) => {
                warn!("Summarization queue rejected job: {}", e);
                false
            }
        }
    }
}
