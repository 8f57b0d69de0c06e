//! Vector index abstraction and implementations.
//!
//! The [`VectorIndex`] trait is the seam between the core and whatever
//! nearest-neighbor service is deployed. Entries are keyed by record id, so
//! upsert is idempotent by construction: re-sending the same entry replaces
//! it in place and can never create a duplicate.
//!
//! - **[`HttpVectorIndex`]** — talks to a Chroma-style REST service.
//! - **[`MemoryVectorIndex`]** — brute-force cosine over in-process maps,
//!   used by tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::config::IndexConfig;
use crate::embedding::cosine_similarity;
use crate::error::CoreError;

/// One entry to upsert into a collection, keyed by its source record id.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// One nearest-neighbor match, in the index's similarity order.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub id: String,
    pub metadata: serde_json::Value,
    pub score: f32,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert-or-replace entries by id. Safe to repeat with the same
    /// inputs: no duplicates, no error.
    async fn upsert(&self, collection: &str, entries: &[IndexEntry]) -> Result<(), CoreError>;

    /// Top-`k` nearest neighbors of `vector` within `collection`.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, CoreError>;
}

// ============ HTTP (Chroma-style) index ============

/// Client for a Chroma-style vector index REST API.
///
/// Collections are resolved by name through `get_or_create`, then addressed
/// by the service-assigned collection id for upsert and query calls.
pub struct HttpVectorIndex {
    url: String,
    client: reqwest::Client,
}

impl HttpVectorIndex {
    pub fn new(config: &IndexConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn collection_id(&self, name: &str) -> Result<String, CoreError> {
        let body = serde_json::json!({ "name": name, "get_or_create": true });
        let response = self
            .client
            .post(format!("{}/api/v1/collections", self.url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Transient(format!(
                "index error {} creating collection '{}': {}",
                status, name, body_text
            )));
        }

        let json: serde_json::Value = response.json().await?;
        json.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                CoreError::Transient("invalid index response: missing collection id".to_string())
            })
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, collection: &str, entries: &[IndexEntry]) -> Result<(), CoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        let collection_id = self.collection_id(collection).await?;
        let body = serde_json::json!({
            "ids": entries.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(),
            "embeddings": entries.iter().map(|e| e.vector.as_slice()).collect::<Vec<_>>(),
            "metadatas": entries.iter().map(|e| &e.metadata).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(format!(
                "{}/api/v1/collections/{}/upsert",
                self.url, collection_id
            ))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Transient(format!(
                "index upsert error {}: {}",
                status, body_text
            )));
        }

        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, CoreError> {
        let collection_id = self.collection_id(collection).await?;
        let body = serde_json::json!({
            "query_embeddings": [vector],
            "n_results": k,
            "include": ["metadatas", "distances"],
        });

        let response = self
            .client
            .post(format!(
                "{}/api/v1/collections/{}/query",
                self.url, collection_id
            ))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Transient(format!(
                "index query error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response.json().await?;
        parse_query_response(&json)
    }
}

/// Parse a Chroma-style query response. Results arrive as parallel arrays
/// nested one level per query embedding; we always send exactly one.
fn parse_query_response(json: &serde_json::Value) -> Result<Vec<IndexHit>, CoreError> {
    let ids = json
        .get("ids")
        .and_then(|v| v.as_array())
        .and_then(|v| v.first())
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            CoreError::Transient("invalid index response: missing ids".to_string())
        })?;

    let distances = json
        .get("distances")
        .and_then(|v| v.as_array())
        .and_then(|v| v.first())
        .and_then(|v| v.as_array());

    let metadatas = json
        .get("metadatas")
        .and_then(|v| v.as_array())
        .and_then(|v| v.first())
        .and_then(|v| v.as_array());

    let mut hits = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        let Some(id) = id.as_str() else { continue };
        let distance = distances
            .and_then(|d| d.get(i))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let metadata = metadatas
            .and_then(|m| m.get(i))
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        hits.push(IndexHit {
            id: id.to_string(),
            metadata,
            // Cosine distance: smaller is closer.
            score: (1.0 - distance) as f32,
        });
    }

    Ok(hits)
}

// ============ In-memory index ============

/// In-memory index for tests: per-collection maps keyed by entry id,
/// brute-force cosine similarity for queries.
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<String, HashMap<String, (Vec<f32>, serde_json::Value)>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries held in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl Default for MemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, collection: &str, entries: &[IndexEntry]) -> Result<(), CoreError> {
        let mut collections = self.collections.write().unwrap();
        let coll = collections.entry(collection.to_string()).or_default();
        for entry in entries {
            coll.insert(
                entry.id.clone(),
                (entry.vector.clone(), entry.metadata.clone()),
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<IndexHit>, CoreError> {
        let collections = self.collections.read().unwrap();
        let Some(coll) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<IndexHit> = coll
            .iter()
            .map(|(id, (vec, metadata))| IndexHit {
                id: id.clone(),
                metadata: metadata.clone(),
                score: cosine_similarity(vector, vec),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            metadata: serde_json::json!({ "record_id": id }),
        }
    }

    #[tokio::test]
    async fn test_memory_upsert_idempotent() {
        let index = MemoryVectorIndex::new();
        let entries = vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])];

        index.upsert("pages", &entries).await.unwrap();
        index.upsert("pages", &entries).await.unwrap();

        assert_eq!(index.len("pages"), 2);
    }

    #[tokio::test]
    async fn test_memory_query_similarity_order() {
        let index = MemoryVectorIndex::new();
        index
            .upsert(
                "pages",
                &[
                    entry("far", vec![0.0, 1.0]),
                    entry("near", vec![1.0, 0.1]),
                    entry("exact", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = index.query("pages", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "exact");
        assert_eq!(hits[1].id, "near");
    }

    #[tokio::test]
    async fn test_memory_query_empty_collection() {
        let index = MemoryVectorIndex::new();
        let hits = index.query("pages", &[1.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_parse_query_response() {
        let json = serde_json::json!({
            "ids": [["p1", "p2"]],
            "distances": [[0.1, 0.4]],
            "metadatas": [[{ "record_id": "p1" }, { "record_id": "p2" }]],
        });
        let hits = parse_query_response(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "p1");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_parse_query_response_missing_ids() {
        let json = serde_json::json!({ "error": "boom" });
        assert!(parse_query_response(&json).is_err());
    }
}
