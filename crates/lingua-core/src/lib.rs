//! ============================================================================
//! LINGUA-CORE: Turn Orchestration for Persona Chat
//! ============================================================================
//! This crate handles the chat turn pipeline for configured assistant
//! personas:
//! - Session resolution and append-only message history (redb)
//! - Long-term memory retrieval via vector similarity (Qdrant + fallback)
//! - Prompt assembly, model invocation, translation extraction
//! - Periodic consolidation of transcripts into durable memory
//!
//! HTTP routing, auth, credential storage, and persona administration live
//! in outer layers; they hand this crate validated inputs and render what
//! it returns.
//! ============================================================================

pub mod agent;
pub mod completion;
pub mod context;
pub mod db;
pub mod memory;
pub mod orchestrator;
pub mod session;
pub mod translation;
pub mod types;

// Re-export main types for convenience
pub use agent::{AgentConfig, AgentKind, AgentRegistry};
pub use completion::{ChatBackend, ChatMessage, CompletionClient, CompletionRequest};
pub use db::{ChatDb, DbStats, MessageRecord, MessageRole, SessionRecord};
pub use memory::{
    Embedder, EmbeddingClient, MemoryConsolidator, MemoryEntry, MemoryRetriever, MemoryScope,
    MemoryStore, QdrantMemoryStore,
};
pub use orchestrator::ChatPipeline;
pub use session::SessionResolver;
pub use translation::{extract_translations, TranslationExtract};
pub use types::{
    ChatError, ModelFailureKind, SessionSummary, TurnOutcome, TurnRequest, WordTranslation,
};
