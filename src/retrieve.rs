//! Semantic retrieval over the vector index.
//!
//! Embeds a free-text query and returns the ids of the nearest records in
//! similarity order. Retrieval is best-effort context assembly: any failure
//! along the path degrades to an empty result rather than an error, since
//! the caller can always proceed without retrieved context.

use tracing::{debug, warn};

use crate::embedding::Embedder;
use crate::index::VectorIndex;

/// Top-`k` record ids nearest to `query` in `collection`, best first.
///
/// `k` is clamped to `max_k`. Returns an empty vec when the query cannot
/// be embedded or the index cannot be reached.
pub async fn retrieve(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    collection: &str,
    query: &str,
    k: usize,
    max_k: usize,
) -> Vec<String> {
    let k = k.min(max_k);
    if k == 0 || query.trim().is_empty() {
        return Vec::new();
    }

    let vector = match embedder.embed(query).await {
        Ok(v) => v,
        Err(e) => {
            warn!(collection, "query embedding failed, returning no context: {}", e);
            return Vec::new();
        }
    };

    let hits = match index.query(collection, &vector, k).await {
        Ok(h) => h,
        Err(e) => {
            warn!(collection, "index query failed, returning no context: {}", e);
            return Vec::new();
        }
    };

    debug!(collection, hits = hits.len(), "retrieval complete");
    hits.into_iter().map(|h| h.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::index::{IndexEntry, MemoryVectorIndex};
    use async_trait::async_trait;

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        fn model_id(&self) -> &str {
            "unit"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model_id(&self) -> &str {
            "broken"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
            Err(CoreError::Transient("embedding service down".into()))
        }
    }

    async fn seeded_index() -> MemoryVectorIndex {
        let index = MemoryVectorIndex::new();
        index
            .upsert(
                "pages",
                &[
                    IndexEntry {
                        id: "near".into(),
                        vector: vec![1.0, 0.1],
                        metadata: serde_json::Value::Null,
                    },
                    IndexEntry {
                        id: "far".into(),
                        vector: vec![0.0, 1.0],
                        metadata: serde_json::Value::Null,
                    },
                ],
            )
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_retrieve_orders_by_similarity() {
        let index = seeded_index().await;
        let ids = retrieve(&UnitEmbedder, &index, "pages", "how do we deploy?", 5, 25).await;
        assert_eq!(ids, vec!["near".to_string(), "far".to_string()]);
    }

    #[tokio::test]
    async fn test_retrieve_clamps_k() {
        let index = seeded_index().await;
        let ids = retrieve(&UnitEmbedder, &index, "pages", "anything?", 100, 1).await;
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_empty_index() {
        let index = MemoryVectorIndex::new();
        let ids = retrieve(&UnitEmbedder, &index, "pages", "anything?", 5, 25).await;
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_embed_failure_degrades_to_empty() {
        let index = seeded_index().await;
        let ids = retrieve(&BrokenEmbedder, &index, "pages", "anything?", 5, 25).await;
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_blank_query() {
        let index = seeded_index().await;
        let ids = retrieve(&UnitEmbedder, &index, "pages", "   ", 5, 25).await;
        assert!(ids.is_empty());
    }
}
