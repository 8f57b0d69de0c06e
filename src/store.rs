//! Durable record store over SQLite.
//!
//! [`RecordStore`] owns the pool and exposes typed, per-entity operations
//! for the two record kinds (pages, interactions) — no generic filter
//! plumbing. The reconciliation engine and index synchronizer reach the
//! store through the narrow [`EmbeddingRepository`] seam so they stay
//! agnostic of the record kind they are driving.
//!
//! Staleness is a property of stored timestamps, never of in-process state:
//! a record needs (re)embedding iff its embedding is absent or its
//! `updated_at` is newer than its `embedded_at`. Content mutations (page
//! re-import, comment append) bump `updated_at` and thereby re-mark the
//! record stale without touching the embedding columns.
//!
//! All timestamps are unix epoch milliseconds.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{Comment, InteractionRecord, PageRecord, RawPage};

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A record that already holds an embedding, ready for index sync.
#[derive(Debug, Clone)]
pub struct EmbeddedRecord {
    pub id: String,
    pub partition: Option<String>,
    pub blob: Vec<u8>,
}

/// The slice of storage the reconciliation engine and index synchronizer
/// need, independent of record kind.
#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    /// Record kind label used in logs and summaries.
    fn kind(&self) -> &'static str;

    /// Ids of records whose embedding is absent or older than their content.
    async fn stale_ids(&self, partition: Option<&str>) -> Result<Vec<String>, CoreError>;

    /// Canonical text for one record, or `None` if the record is gone.
    async fn canonical_text(&self, id: &str) -> Result<Option<String>, CoreError>;

    /// Write back a freshly generated embedding and stamp `embedded_at`.
    async fn write_embedding(&self, id: &str, vector: &[f32]) -> Result<(), CoreError>;

    /// All records holding an embedding, optionally scoped to a partition.
    async fn embedded_records(
        &self,
        partition: Option<&str>,
    ) -> Result<Vec<EmbeddedRecord>, CoreError>;
}

pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Pages ============

    /// Insert or refresh a page from its source representation.
    ///
    /// Embedding columns are left untouched: a content change makes the
    /// record stale through `updated_at`, and reconciliation catches up.
    pub async fn upsert_page(&self, space_key: &str, page: &RawPage) -> Result<(), CoreError> {
        let comments_json = serde_json::to_string(&page.comments)
            .map_err(|e| CoreError::Validation(format!("unserializable comments: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO pages (page_id, space_key, title, author, created_at, updated_at, content, comments_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(page_id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at,
                content = excluded.content,
                comments_json = excluded.comments_json
            "#,
        )
        .bind(&page.id)
        .bind(space_key)
        .bind(&page.title)
        .bind(&page.author)
        .bind(page.created_at.timestamp_millis())
        .bind(page.updated_at.timestamp_millis())
        .bind(&page.content)
        .bind(&comments_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_page(&self, page_id: &str) -> Result<Option<PageRecord>, CoreError> {
        let row = sqlx::query("SELECT * FROM pages WHERE page_id = ?")
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(page_from_row).transpose()
    }

    pub async fn list_stale_page_ids(
        &self,
        space_key: Option<&str>,
    ) -> Result<Vec<String>, CoreError> {
        let rows = match space_key {
            Some(key) => {
                sqlx::query(
                    "SELECT page_id FROM pages
                     WHERE space_key = ?
                       AND (embedding IS NULL OR embedded_at IS NULL OR updated_at > embedded_at)",
                )
                .bind(key)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT page_id FROM pages
                     WHERE embedding IS NULL OR embedded_at IS NULL OR updated_at > embedded_at",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(|r| r.get("page_id")).collect())
    }

    pub async fn write_page_embedding(
        &self,
        page_id: &str,
        vector: &[f32],
    ) -> Result<(), CoreError> {
        let blob = crate::embedding::vec_to_blob(vector);
        let result = sqlx::query(
            "UPDATE pages SET embedding = ?, embedded_at = ? WHERE page_id = ?",
        )
        .bind(&blob)
        .bind(now_ms())
        .bind(page_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Integrity(format!(
                "no page with id {}",
                page_id
            )));
        }
        Ok(())
    }

    pub async fn list_embedded_pages(
        &self,
        space_key: Option<&str>,
    ) -> Result<Vec<EmbeddedRecord>, CoreError> {
        let rows = match space_key {
            Some(key) => {
                sqlx::query(
                    "SELECT page_id, space_key, embedding FROM pages
                     WHERE space_key = ? AND embedding IS NOT NULL",
                )
                .bind(key)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT page_id, space_key, embedding FROM pages WHERE embedding IS NOT NULL",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .iter()
            .map(|row| EmbeddedRecord {
                id: row.get("page_id"),
                partition: Some(row.get("space_key")),
                blob: row.get("embedding"),
            })
            .collect())
    }

    // ============ Interactions ============

    /// Record a new question thread. `thread_id` must be unique; the
    /// correlator's dedup gate guarantees this is only called once per
    /// message.
    pub async fn insert_interaction(
        &self,
        thread_id: &str,
        channel: &str,
        question_text: &str,
        origin_user_id: &str,
    ) -> Result<InteractionRecord, CoreError> {
        let now = now_ms();
        let record = InteractionRecord {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            channel: channel.to_string(),
            question_text: question_text.to_string(),
            answer_text: None,
            assistant_thread_id: None,
            origin_user_id: origin_user_id.to_string(),
            asked_at: now,
            updated_at: now,
            comments: Vec::new(),
            embedding: None,
            embedded_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO interactions
                (id, thread_id, channel, question_text, origin_user_id, asked_at, updated_at, comments_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, '[]')
            "#,
        )
        .bind(&record.id)
        .bind(&record.thread_id)
        .bind(&record.channel)
        .bind(&record.question_text)
        .bind(&record.origin_user_id)
        .bind(record.asked_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn find_interaction_by_thread(
        &self,
        thread_id: &str,
    ) -> Result<Option<InteractionRecord>, CoreError> {
        let row = sqlx::query("SELECT * FROM interactions WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(interaction_from_row).transpose()
    }

    pub async fn find_interaction(
        &self,
        id: &str,
    ) -> Result<Option<InteractionRecord>, CoreError> {
        let row = sqlx::query("SELECT * FROM interactions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(interaction_from_row).transpose()
    }

    /// Store the assistant's answer on the question's interaction.
    pub async fn set_answer(
        &self,
        thread_id: &str,
        answer_text: &str,
        assistant_thread_id: Option<&str>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE interactions
             SET answer_text = ?, assistant_thread_id = ?, updated_at = ?
             WHERE thread_id = ?",
        )
        .bind(answer_text)
        .bind(assistant_thread_id)
        .bind(now_ms())
        .bind(thread_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Integrity(format!(
                "no interaction for thread {}",
                thread_id
            )));
        }
        Ok(())
    }

    /// Append one comment to an interaction's comment list.
    ///
    /// Read-modify-write of the list runs inside a transaction so two
    /// concurrent appends cannot lose each other. Bumps `updated_at`,
    /// which re-marks the record stale for reconciliation.
    pub async fn append_comment(
        &self,
        thread_id: &str,
        comment: &Comment,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT comments_json FROM interactions WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(CoreError::Integrity(format!(
                "no interaction for thread {}",
                thread_id
            )));
        };

        let comments_json: String = row.get("comments_json");
        let mut comments: Vec<Comment> = serde_json::from_str(&comments_json)
            .map_err(|e| CoreError::Integrity(format!("corrupt comments for {}: {}", thread_id, e)))?;
        comments.push(comment.clone());
        let updated = serde_json::to_string(&comments)
            .map_err(|e| CoreError::Validation(format!("unserializable comment: {}", e)))?;

        sqlx::query(
            "UPDATE interactions SET comments_json = ?, updated_at = ? WHERE thread_id = ?",
        )
        .bind(&updated)
        .bind(now_ms())
        .bind(thread_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_stale_interaction_ids(&self) -> Result<Vec<String>, CoreError> {
        let rows = sqlx::query(
            "SELECT id FROM interactions
             WHERE embedding IS NULL OR embedded_at IS NULL OR updated_at > embedded_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    pub async fn write_interaction_embedding(
        &self,
        id: &str,
        vector: &[f32],
    ) -> Result<(), CoreError> {
        let blob = crate::embedding::vec_to_blob(vector);
        let result =
            sqlx::query("UPDATE interactions SET embedding = ?, embedded_at = ? WHERE id = ?")
                .bind(&blob)
                .bind(now_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Integrity(format!("no interaction with id {}", id)));
        }
        Ok(())
    }

    pub async fn list_embedded_interactions(&self) -> Result<Vec<EmbeddedRecord>, CoreError> {
        let rows =
            sqlx::query("SELECT id, embedding FROM interactions WHERE embedding IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .iter()
            .map(|row| EmbeddedRecord {
                id: row.get("id"),
                partition: None,
                blob: row.get("embedding"),
            })
            .collect())
    }

    /// All interactions, used to rebuild the correlator's in-memory state
    /// at startup. The durable rows are the source of truth; the rebuilt
    /// cache is not.
    pub async fn all_interactions(&self) -> Result<Vec<InteractionRecord>, CoreError> {
        let rows = sqlx::query("SELECT * FROM interactions ORDER BY asked_at")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(interaction_from_row).collect()
    }
}

fn page_from_row(row: sqlx::sqlite::SqliteRow) -> Result<PageRecord, CoreError> {
    let comments_json: String = row.get("comments_json");
    let comments = serde_json::from_str(&comments_json)
        .map_err(|e| CoreError::Integrity(format!("corrupt page comments: {}", e)))?;

    Ok(PageRecord {
        page_id: row.get("page_id"),
        space_key: row.get("space_key"),
        title: row.get("title"),
        author: row.get("author"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        content: row.get("content"),
        comments,
        embedding: row.get("embedding"),
        embedded_at: row.get("embedded_at"),
    })
}

fn interaction_from_row(row: sqlx::sqlite::SqliteRow) -> Result<InteractionRecord, CoreError> {
    let comments_json: String = row.get("comments_json");
    let comments = serde_json::from_str(&comments_json)
        .map_err(|e| CoreError::Integrity(format!("corrupt interaction comments: {}", e)))?;

    Ok(InteractionRecord {
        id: row.get("id"),
        thread_id: row.get("thread_id"),
        channel: row.get("channel"),
        question_text: row.get("question_text"),
        answer_text: row.get("answer_text"),
        assistant_thread_id: row.get("assistant_thread_id"),
        origin_user_id: row.get("origin_user_id"),
        asked_at: row.get("asked_at"),
        updated_at: row.get("updated_at"),
        comments,
        embedding: row.get("embedding"),
        embedded_at: row.get("embedded_at"),
    })
}

// ============ Per-entity repository views ============

/// Page view over the store for the reconciliation/sync engines.
pub struct PageRepository {
    store: Arc<RecordStore>,
}

impl PageRepository {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EmbeddingRepository for PageRepository {
    fn kind(&self) -> &'static str {
        "page"
    }

    async fn stale_ids(&self, partition: Option<&str>) -> Result<Vec<String>, CoreError> {
        self.store.list_stale_page_ids(partition).await
    }

    async fn canonical_text(&self, id: &str) -> Result<Option<String>, CoreError> {
        Ok(self.store.find_page(id).await?.map(|p| p.canonical_text()))
    }

    async fn write_embedding(&self, id: &str, vector: &[f32]) -> Result<(), CoreError> {
        self.store.write_page_embedding(id, vector).await
    }

    async fn embedded_records(
        &self,
        partition: Option<&str>,
    ) -> Result<Vec<EmbeddedRecord>, CoreError> {
        self.store.list_embedded_pages(partition).await
    }
}

/// Interaction view over the store. Interactions have no partition key;
/// any supplied partition is ignored.
pub struct InteractionRepository {
    store: Arc<RecordStore>,
}

impl InteractionRepository {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EmbeddingRepository for InteractionRepository {
    fn kind(&self) -> &'static str {
        "interaction"
    }

    async fn stale_ids(&self, _partition: Option<&str>) -> Result<Vec<String>, CoreError> {
        self.store.list_stale_interaction_ids().await
    }

    async fn canonical_text(&self, id: &str) -> Result<Option<String>, CoreError> {
        Ok(self
            .store
            .find_interaction(id)
            .await?
            .map(|i| i.canonical_text()))
    }

    async fn write_embedding(&self, id: &str, vector: &[f32]) -> Result<(), CoreError> {
        self.store.write_interaction_embedding(id, vector).await
    }

    async fn embedded_records(
        &self,
        _partition: Option<&str>,
    ) -> Result<Vec<EmbeddedRecord>, CoreError> {
        self.store.list_embedded_interactions().await
    }
}
