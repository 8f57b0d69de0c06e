//! Vector index synchronizer.
//!
//! Projects embedded records from the store into the queryable
//! nearest-neighbor index. This is a downstream projection, not part of the
//! staleness invariant: reconciliation marks records embedded when the
//! vector is written back to the store, and sync can run on its own cadence
//! afterward.

use tracing::warn;

use crate::error::CoreError;
use crate::index::{IndexEntry, VectorIndex};
use crate::store::EmbeddingRepository;

/// Entries are sent to the index service in groups of this size.
const UPSERT_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOutcome {
    /// Records upserted into the index.
    pub synced: usize,
    /// Records whose stored embedding could not be decoded.
    pub skipped: usize,
}

/// Read all records holding an embedding (optionally scoped to a partition)
/// and upsert each into `collection`, keyed by record id.
///
/// Idempotent: re-running with the same inputs replaces entries in place
/// and never grows the index. Undecodable embeddings are skipped and
/// counted, never fatal to the batch.
pub async fn sync_records(
    repo: &dyn EmbeddingRepository,
    index: &dyn VectorIndex,
    collection: &str,
    partition: Option<&str>,
) -> Result<SyncOutcome, CoreError> {
    let records = repo.embedded_records(partition).await?;

    let mut entries = Vec::with_capacity(records.len());
    let mut skipped = 0usize;

    for record in &records {
        let vector = match crate::embedding::blob_to_vec(&record.blob) {
            Ok(v) => v,
            Err(e) => {
                warn!(kind = repo.kind(), id = %record.id, "skipping undecodable embedding: {}", e);
                skipped += 1;
                continue;
            }
        };

        let mut metadata = serde_json::json!({ "record_id": record.id });
        if let Some(partition) = &record.partition {
            metadata["partition"] = serde_json::Value::String(partition.clone());
        }

        entries.push(IndexEntry {
            id: record.id.clone(),
            vector,
            metadata,
        });
    }

    for batch in entries.chunks(UPSERT_BATCH) {
        index.upsert(collection, batch).await?;
    }

    Ok(SyncOutcome {
        synced: entries.len(),
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryVectorIndex;
    use crate::store::tests::{raw_page, test_store};
    use crate::store::PageRepository;

    #[tokio::test]
    async fn test_sync_projects_embedded_pages() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        store.upsert_page("ENG", &raw_page("p2", 1_700_000_100)).await.unwrap();
        store.write_page_embedding("p1", &[1.0, 0.0]).await.unwrap();
        // p2 stays unembedded and must not be synced.

        let repo = PageRepository::new(store);
        let index = MemoryVectorIndex::new();

        let outcome = sync_records(&repo, &index, "pages", None).await.unwrap();
        assert_eq!(outcome, SyncOutcome { synced: 1, skipped: 0 });
        assert_eq!(index.len("pages"), 1);
    }

    #[tokio::test]
    async fn test_sync_twice_is_idempotent() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        store.write_page_embedding("p1", &[1.0, 0.0]).await.unwrap();

        let repo = PageRepository::new(store);
        let index = MemoryVectorIndex::new();

        let first = sync_records(&repo, &index, "pages", None).await.unwrap();
        let second = sync_records(&repo, &index, "pages", None).await.unwrap();

        assert_eq!(first.synced, 1);
        assert_eq!(second.synced, 1);
        assert_eq!(index.len("pages"), 1, "no duplicate entries on re-sync");
    }

    #[tokio::test]
    async fn test_sync_skips_undecodable_blob() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        store.upsert_page("ENG", &raw_page("p2", 1_700_000_100)).await.unwrap();
        store.write_page_embedding("p1", &[1.0, 0.0]).await.unwrap();

        // Corrupt p2's embedding: 3 bytes is not a whole number of floats.
        sqlx::query("UPDATE pages SET embedding = ?, embedded_at = 1 WHERE page_id = 'p2'")
            .bind(vec![1u8, 2, 3])
            .execute(store.pool())
            .await
            .unwrap();

        let repo = PageRepository::new(store);
        let index = MemoryVectorIndex::new();

        let outcome = sync_records(&repo, &index, "pages", None).await.unwrap();
        assert_eq!(outcome, SyncOutcome { synced: 1, skipped: 1 });
        assert_eq!(index.len("pages"), 1);
    }

    #[tokio::test]
    async fn test_sync_scoped_to_partition() {
        let (_dir, store) = test_store().await;
        store.upsert_page("ENG", &raw_page("p1", 1_700_000_100)).await.unwrap();
        store.upsert_page("OPS", &raw_page("p2", 1_700_000_100)).await.unwrap();
        store.write_page_embedding("p1", &[1.0, 0.0]).await.unwrap();
        store.write_page_embedding("p2", &[0.0, 1.0]).await.unwrap();

        let repo = PageRepository::new(store);
        let index = MemoryVectorIndex::new();

        let outcome = sync_records(&repo, &index, "pages", Some("OPS")).await.unwrap();
        assert_eq!(outcome.synced, 1);

        let hits = index.query("pages", &[0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "p2");
        assert_eq!(hits[0].metadata["partition"], "OPS");
    }
}
