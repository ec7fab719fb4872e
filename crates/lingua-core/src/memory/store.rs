//! ============================================================================
//! Memory Store - Qdrant vector database operations
//! ============================================================================
//! Durable storage for memory entries, scoped per (agent, user). The trait
//! is the seam the retriever and consolidator depend on; an in-memory
//! implementation backs the pipeline tests.
//! ============================================================================

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, vectors_output::VectorsOptions, Condition, CreateCollectionBuilder,
    DeletePointsBuilder, Distance, Filter, PointStruct, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::embeddings::EMBEDDING_DIM;
use super::types::{MemoryContext, MemoryEntry, MemoryScope, ScoredMemory};

/// Collection name for memory entries
pub const COLLECTION_NAME: &str = "lingua_memories";

/// Upper bound on points pulled for the in-process scan fallback, for
/// summarization snapshots, and for `count`, which saturates at this
/// bound. Must stay comfortably above the summarization threshold that
/// keeps scopes small.
const SCROLL_WINDOW: u32 = 256;

/// Marker error raised by stores whose backend has no native vector index.
/// The retriever latches onto it and stops probing.
#[derive(Debug, thiserror::Error)]
#[error("Native vector search unsupported by this store")]
pub struct SearchUnsupported;

/// Seam for durable memory storage.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert(&self, entry: &MemoryEntry) -> Result<()>;

    /// Native indexed similarity search: threshold-clipped, descending,
    /// at most `top_k` results. May fail with [`SearchUnsupported`].
    async fn search(
        &self,
        scope: &MemoryScope,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredMemory>>;

    /// Most recent entries for a scope, vectors included, newest first.
    async fn recent(&self, scope: &MemoryScope, limit: usize) -> Result<Vec<MemoryEntry>>;

    /// Oldest entries for a scope, oldest first. Summarization input.
    async fn oldest(&self, scope: &MemoryScope, limit: usize) -> Result<Vec<MemoryEntry>>;

    /// Entry count for a scope. Implementations may saturate at an
    /// internal window well above the summarization threshold.
    async fn count(&self, scope: &MemoryScope) -> Result<usize>;

    async fn delete(&self, ids: &[Uuid]) -> Result<()>;
}

/// Memory store backed by a Qdrant vector database
pub struct QdrantMemoryStore {
    client: Qdrant,
}

impl QdrantMemoryStore {
    /// Create a new memory store, connecting to Qdrant
    pub async fn new(url: &str) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| anyhow!("Failed to create Qdrant client: {}", e))?;

        let store = Self { client };
        store.ensure_collection().await?;
        Ok(store)
    }

    /// Ensure the memories collection exists
    async fn ensure_collection(&self) -> Result<()> {
        let exists = self
            .client
            .collection_exists(COLLECTION_NAME)
            .await
            .map_err(|e| anyhow!("Failed to check collection existence: {}", e))?;

        if !exists {
            info!("Creating collection: {}", COLLECTION_NAME);

            self.client
                .create_collection(
                    CreateCollectionBuilder::new(COLLECTION_NAME).vectors_config(
                        VectorParamsBuilder::new(EMBEDDING_DIM as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| anyhow!("Failed to create collection: {}", e))?;

            info!("Collection {} created successfully", COLLECTION_NAME);
        } else {
            debug!("Collection {} already exists", COLLECTION_NAME);
        }

        Ok(())
    }

    fn scope_filter(scope: &MemoryScope) -> Filter {
        Filter::must([
            Condition::matches("agent_id", scope.agent_id),
            Condition::matches("user_id", scope.user_id.clone()),
        ])
    }

    /// Pull a bounded window of a scope's entries, vectors included.
    async fn scroll_scope(&self, scope: &MemoryScope) -> Result<Vec<MemoryEntry>> {
        let scroll_result = self
            .client
            .scroll(
                ScrollPointsBuilder::new(COLLECTION_NAME)
                    .filter(Self::scope_filter(scope))
                    .limit(SCROLL_WINDOW)
                    .with_payload(true)
                    .with_vectors(true),
            )
            .await
            .map_err(|e| anyhow!("Failed to scroll memories: {}", e))?;

        let entries = scroll_result
            .result
            .into_iter()
            .filter_map(|point| {
                let id = extract_uuid_from_point_id(point.id?)?;
                let vector = point.vectors.and_then(|v| match v.vectors_options {
                    Some(VectorsOptions::Vector(data)) => Some(data.data),
                    _ => None,
                });
                entry_from_payload(id, &point.payload, vector.unwrap_or_default())
            })
            .collect();
        Ok(entries)
    }
}

#[async_trait]
impl MemoryStore for QdrantMemoryStore {
    async fn insert(&self, entry: &MemoryEntry) -> Result<()> {
        if entry.vector.is_empty() {
            return Err(anyhow!("Cannot store memory entry without a vector"));
        }

        debug!(
            "Storing memory {} for agent {} / user {}",
            entry.id, entry.agent_id, entry.user_id
        );

        let mut payload: HashMap<String, Value> = [
            ("agent_id".to_string(), Value::from(entry.agent_id)),
            ("user_id".to_string(), Value::from(entry.user_id.clone())),
            ("key_point".to_string(), Value::from(entry.key_point.clone())),
            ("created_at".to_string(), Value::from(entry.created_at)),
            ("updated_at".to_string(), Value::from(entry.updated_at)),
        ]
        .into_iter()
        .collect();

        if let Some(context) = &entry.context {
            payload.insert("session_id".to_string(), Value::from(context.session_id));
            payload.insert(
                "session_name".to_string(),
                Value::from(context.session_name.clone()),
            );
            payload.insert(
                "message_count".to_string(),
                Value::from(context.message_count as i64),
            );
        }

        let point = PointStruct::new(entry.id.to_string(), entry.vector.clone(), payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(COLLECTION_NAME, vec![point]))
            .await
            .map_err(|e| anyhow!("Failed to upsert memory entry: {}", e))?;

        Ok(())
    }

    async fn search(
        &self,
        scope: &MemoryScope,
        query: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredMemory>> {
        debug!(
            "Native memory search for agent {} / user {} (top_k: {}, threshold: {})",
            scope.agent_id, scope.user_id, top_k, threshold
        );

        let search_result = self
            .client
            .search_points(
                SearchPointsBuilder::new(COLLECTION_NAME, query.to_vec(), top_k as u64)
                    .filter(Self::scope_filter(scope))
                    .score_threshold(threshold)
                    .with_payload(true),
            )
            .await
            .map_err(|e| anyhow!("Failed to search memories: {}", e))?;

        let memories: Vec<ScoredMemory> = search_result
            .result
            .into_iter()
            .filter_map(|point| {
                let id = extract_uuid_from_point_id(point.id?)?;
                let entry = entry_from_payload(id, &point.payload, vec![])?;
                Some(ScoredMemory {
                    entry,
                    similarity: point.score,
                })
            })
            .collect();

        debug!("Found {} matching memories", memories.len());
        Ok(memories)
    }

    async fn recent(&self, scope: &MemoryScope, limit: usize) -> Result<Vec<MemoryEntry>> {
        let mut entries = self.scroll_scope(scope).await?;
        entries.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn oldest(&self, scope: &MemoryScope, limit: usize) -> Result<Vec<MemoryEntry>> {
        let mut entries = self.scroll_scope(scope).await?;
        entries.sort_by_key(|e| e.created_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn count(&self, scope: &MemoryScope) -> Result<usize> {
        Ok(self.scroll_scope(scope).await?.len())
    }

    async fn delete(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(COLLECTION_NAME)
                    .points(ids.iter().map(|id| id.to_string()).collect::<Vec<_>>()),
            )
            .await
            .map_err(|e| anyhow!("Failed to delete memory entries: {}", e))?;

        debug!("Deleted {} memory entries", ids.len());
        Ok(())
    }
}

fn entry_from_payload(
    id: Uuid,
    payload: &HashMap<String, Value>,
    vector: Vec<f32>,
) -> Option<MemoryEntry> {
    let context = match (
        get_i64(payload, "session_id"),
        get_string(payload, "session_name"),
        get_i64(payload, "message_count"),
    ) {
        (Some(session_id), Some(session_name), Some(message_count)) => Some(MemoryContext {
            session_id,
            session_name,
            message_count: message_count as usize,
        }),
        _ => None,
    };

    Some(MemoryEntry {
        id,
        agent_id: get_i64(payload, "agent_id")?,
        user_id: get_string(payload, "user_id")?,
        key_point: get_string(payload, "key_point")?,
        vector,
        context,
        created_at: get_i64(payload, "created_at").unwrap_or(0),
        updated_at: get_i64(payload, "updated_at").unwrap_or(0),
    })
}

// Helper to extract UUID from PointId
fn extract_uuid_from_point_id(point_id: qdrant_client::qdrant::PointId) -> Option<Uuid> {
    match point_id.point_id_options? {
        PointIdOptions::Uuid(uuid_str) => Uuid::parse_str(&uuid_str).ok(),
        PointIdOptions::Num(_) => None, // We use UUID strings, not numeric IDs
    }
}

// Helper functions to extract values from payload
fn get_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str().map(|s| s.to_string()))
}

fn get_i64(payload: &HashMap<String, Value>, key: &str) -> Option<i64> {
    payload.get(key).and_then(|v| v.as_integer())
}

// ============================================================================
// In-memory store (tests)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_from_payload_marshalling() {
        let id = Uuid::new_v4();
        let payload: HashMap<String, Value> = [
            ("agent_id".to_string(), Value::from(3_i64)),
            ("user_id".to_string(), Value::from("user-a".to_string())),
            ("key_point".to_string(), Value::from("Likes tea".to_string())),
            ("created_at".to_string(), Value::from(100_i64)),
            ("updated_at".to_string(), Value::from(100_i64)),
            ("session_id".to_string(), Value::from(7_i64)),
            ("session_name".to_string(), Value::from("Chat".to_string())),
            ("message_count".to_string(), Value::from(1_i64)),
        ]
        .into_iter()
        .collect();

        let entry = entry_from_payload(id, &payload, vec![0.5, 0.5]).unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.agent_id, 3);
        assert_eq!(entry.user_id, "user-a");
        assert_eq!(entry.key_point, "Likes tea");
        assert_eq!(entry.vector, vec![0.5, 0.5]);
        let context = entry.context.unwrap();
        assert_eq!(context.session_id, 7);
        assert_eq!(context.session_name, "Chat");
        assert_eq!(context.message_count, 1);
    }

    #[test]
    fn test_entry_from_payload_missing_required_field() {
        let payload: HashMap<String, Value> = [
            ("agent_id".to_string(), Value::from(3_i64)),
            ("key_point".to_string(), Value::from("orphan".to_string())),
        ]
        .into_iter()
        .collect();

        assert!(entry_from_payload(Uuid::new_v4(), &payload, vec![]).is_none());
    }

    // Integration tests require a running Qdrant instance
    // These are marked as ignored by default

    #[tokio::test]
    #[ignore]
    async fn test_store_and_search() {
        let store = QdrantMemoryStore::new("http://localhost:6334").await.unwrap();
        let scope = MemoryScope::new(1, "test_user");

        let entry = MemoryEntry::new(
            1,
            "test_user".to_string(),
            "Test memory content".to_string(),
            vec![0.1; EMBEDDING_DIM],
        );

        store.insert(&entry).await.unwrap();

        let results = store
            .search(&scope, &vec![0.1; EMBEDDING_DIM], 10, 0.5)
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].entry.key_point, "Test memory content");
        assert!(results[0].similarity >= 0.5);

        // Cleanup
        store.delete(&[entry.id]).await.unwrap();
    }
}
