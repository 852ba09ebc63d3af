use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect and create every table. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Chunk vectors for the sqlite retrieval backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            namespace TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            chunk_index INTEGER,
            title TEXT NOT NULL DEFAULT '',
            published TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_doc ON chunk_vectors(namespace, doc_id, chunk_index)",
    )
    .execute(pool)
    .await?;

    // One row per completed chat turn
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workspace_chats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace_slug TEXT NOT NULL,
            prompt TEXT NOT NULL,
            response_json TEXT NOT NULL,
            thread_id TEXT,
            user_id TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_workspace_chats_thread ON workspace_chats(workspace_slug, thread_id, id)",
    )
    .execute(pool)
    .await?;

    // Prompt/response audit log keyed by chat
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS llm_message_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id INTEGER NOT NULL UNIQUE,
            system_prompt TEXT,
            user_prompt TEXT,
            llm_response TEXT,
            rag_context TEXT,
            chat_history TEXT,
            compressed_messages TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (chat_id) REFERENCES workspace_chats(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
