//! ============================================================================
//! Memory Module - Long-term personalization for agent personas
//! ============================================================================
//! Durable key points about each user, embedded and stored per
//! (agent, user) scope:
//! - EmbeddingClient: text -> fixed-length vector (OpenAI-compatible API)
//! - QdrantMemoryStore: vector persistence and native similarity search
//! - MemoryRetriever: native search with an in-process cosine fallback
//! - MemoryConsolidator: transcript distillation and entry summarization
//! ============================================================================

pub mod consolidator;
pub mod embeddings;
pub mod retrieval;
pub mod similarity;
pub mod store;
pub mod types;

pub use consolidator::{
    should_create_memory, ConsolidationQueue, MemoryConsolidator, SummarizeJob, MEMORY_INTERVAL,
    SUMMARIZE_THRESHOLD,
};
pub use embeddings::{Embedder, EmbeddingClient, DEFAULT_EMBEDDING_MODEL, EMBEDDING_DIM};
pub use retrieval::{MemoryRetriever, DEFAULT_THRESHOLD, DEFAULT_TOP_K};
pub use similarity::{cosine_similarity, top_k_above_threshold};
pub use store::{MemoryStore, QdrantMemoryStore, SearchUnsupported, COLLECTION_NAME};
pub use types::{MemoryContext, MemoryEntry, MemoryScope, ScoredMemory};
