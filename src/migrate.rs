use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent — safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            page_id TEXT PRIMARY KEY,
            space_key TEXT NOT NULL,
            title TEXT NOT NULL,
            author TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            content TEXT NOT NULL,
            comments_json TEXT NOT NULL DEFAULT '[]',
            embedding BLOB,
            embedded_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interactions (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL UNIQUE,
            channel TEXT NOT NULL,
            question_text TEXT NOT NULL,
            answer_text TEXT,
            assistant_thread_id TEXT,
            origin_user_id TEXT NOT NULL,
            asked_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            comments_json TEXT NOT NULL DEFAULT '[]',
            embedding BLOB,
            embedded_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_space_key ON pages(space_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_embedded_at ON pages(embedded_at)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_interactions_embedded_at ON interactions(embedded_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
