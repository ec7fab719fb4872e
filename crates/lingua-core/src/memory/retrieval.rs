//! ============================================================================
//! Memory Retrieval - Dual-strategy similarity search
//! ============================================================================
//! Primary: the store's native vector index. Fallback: a bounded in-process
//! cosine scan over the scope's recent entries. Callers cannot tell which
//! strategy served them; both honor the same threshold, ordering, and top-k
//! contract. Retrieval is an optimization: total failure yields an empty
//! result, never an error.
//! ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::similarity::top_k_above_threshold;
use super::store::{MemoryStore, SearchUnsupported};
use super::types::{MemoryScope, ScoredMemory};

/// Bounded window of recent entries scanned by the fallback strategy.
const SCAN_WINDOW: usize = 100;

/// Default number of memories retrieved per turn.
pub const DEFAULT_TOP_K: usize = 5;

/// Default minimum cosine similarity for a memory to be considered relevant.
pub const DEFAULT_THRESHOLD: f32 = 0.3;

pub struct MemoryRetriever {
    store: Arc<dyn MemoryStore>,
    /// Latched when the store reports its native index unsupported.
    /// Transient native failures fall back per-call without latching.
    native_unsupported: AtomicBool,
}

impl MemoryRetriever {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            native_unsupported: AtomicBool::new(false),
        }
    }

    /// Find the memories most similar to the query vector within a scope.
    /// Results are threshold-clipped, sorted descending by similarity, and
    /// capped at `top_k`.
    pub async fn find_similar(
        &self,
        query: &[f32],
        scope: &MemoryScope,
        top_k: usize,
        threshold: f32,
    ) -> Vec<ScoredMemory> {
        if !self.native_unsupported.load(Ordering::Relaxed) {
            match self.store.search(scope, query, top_k, threshold).await {
                Ok(results) => return results,
                Err(e) => {
                    if e.downcast_ref::<SearchUnsupported>().is_some() {
                        debug!("Native vector search unsupported, switching to scan fallback");
                        self.native_unsupported.store(true, Ordering::Relaxed);
                    } else {
                        warn!(
                            "Native memory search failed for agent {} / user {}: {}",
                            scope.agent_id, scope.user_id, e
                        );
                    }
                }
            }
        }

        self.scan_fallback(query, scope, top_k, threshold).await
    }

    /// In-process scan: load a bounded window of the scope's most recent
    /// entries and score them locally.
    async fn scan_fallback(
        &self,
        query: &[f32],
        scope: &MemoryScope,
        top_k: usize,
        threshold: f32,
    ) -> Vec<ScoredMemory> {
        let entries = match self.store.recent(scope, SCAN_WINDOW).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Memory scan fallback failed for agent {} / user {}: {}",
                    scope.agent_id, scope.user_id, e
                );
                return Vec::new();
            }
        };

        let candidates = entries
            .into_iter()
            .map(|entry| (entry.vector.clone(), entry))
            .collect();

        top_k_above_threshold(query, candidates, top_k, threshold)
            .into_iter()
            .map(|(similarity, entry)| ScoredMemory { entry, similarity })
            .collect()
    }
}
