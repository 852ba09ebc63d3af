//! Chat persistence.
//!
//! [`ChatStore`] is the persistence collaborator of the reasoning loop: it
//! writes one row per completed turn and hands back recent turns as
//! conversation history. [`SqliteChatStore`] backs it with the
//! `workspace_chats` and `llm_message_logs` tables.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use ragloop_core::models::{ChatMessage, ChatTranscript};

/// Audit record of the messages exchanged with the model for one turn.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    pub system_prompt: String,
    pub user_prompt: String,
    pub llm_response: String,
    pub rag_context: Vec<String>,
    pub chat_history: Vec<ChatMessage>,
    pub compressed_messages: Vec<ChatMessage>,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist a finished turn and return its record id.
    async fn save_turn(
        &self,
        workspace_slug: &str,
        transcript: &ChatTranscript,
        thread_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<i64>;

    /// The last `limit` turns of one user's workspace thread as alternating
    /// user/assistant messages, oldest first. An absent user only sees
    /// other anonymous turns.
    async fn recent_history(
        &self,
        workspace_slug: &str,
        thread_id: Option<&str>,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>>;

    async fn log_messages(&self, chat_id: i64, log: &MessageLog) -> Result<()>;
}

pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn save_turn(
        &self,
        workspace_slug: &str,
        transcript: &ChatTranscript,
        thread_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO workspace_chats (workspace_slug, prompt, response_json, thread_id, user_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(workspace_slug)
        .bind(&transcript.prompt_text)
        .bind(transcript.response_json().to_string())
        .bind(thread_id)
        .bind(user_id)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("failed to insert chat")?;

        Ok(result.last_insert_rowid())
    }

    async fn recent_history(
        &self,
        workspace_slug: &str,
        thread_id: Option<&str>,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT prompt, response_json
            FROM workspace_chats
            WHERE workspace_slug = ? AND thread_id IS ? AND user_id IS ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(workspace_slug)
        .bind(thread_id)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut history = Vec::with_capacity(rows.len() * 2);
        for row in rows.iter().rev() {
            let prompt: String = row.get("prompt");
            let response: String = row.get("response_json");
            let text = serde_json::from_str::<serde_json::Value>(&response)
                .ok()
                .and_then(|json| json.get("text").and_then(|t| t.as_str()).map(str::to_string))
                .unwrap_or_default();

            history.push(ChatMessage::user(prompt));
            history.push(ChatMessage::assistant(text));
        }
        Ok(history)
    }

    async fn log_messages(&self, chat_id: i64, log: &MessageLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_message_logs (chat_id, system_prompt, user_prompt, llm_response,
                                          rag_context, chat_history, compressed_messages, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id) DO UPDATE SET
                system_prompt = excluded.system_prompt,
                user_prompt = excluded.user_prompt,
                llm_response = excluded.llm_response,
                rag_context = excluded.rag_context,
                chat_history = excluded.chat_history,
                compressed_messages = excluded.compressed_messages
            "#,
        )
        .bind(chat_id)
        .bind(&log.system_prompt)
        .bind(&log.user_prompt)
        .bind(&log.llm_response)
        .bind(serde_json::to_string(&log.rag_context)?)
        .bind(serde_json::to_string(&log.chat_history)?)
        .bind(serde_json::to_string(&log.compressed_messages)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("failed to write message log")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use ragloop_core::models::Role;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteChatStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        SqliteChatStore::new(pool)
    }

    fn transcript(prompt: &str, answer: &str) -> ChatTranscript {
        ChatTranscript {
            prompt_text: prompt.to_string(),
            final_answer_text: answer.to_string(),
            sources: Vec::new(),
            react_trace: Vec::new(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_history_is_oldest_first_and_limited() {
        let store = store().await;
        for i in 0..3 {
            store
                .save_turn("ws", &transcript(&format!("q{}", i), &format!("a{}", i)), None, None)
                .await
                .unwrap();
        }

        let history = store.recent_history("ws", None, None, 2).await.unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2", "a2"]);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_history_is_scoped_by_thread() {
        let store = store().await;
        store
            .save_turn("ws", &transcript("main", "m"), None, Some("u1"))
            .await
            .unwrap();
        store
            .save_turn("ws", &transcript("side", "s"), Some("t-1"), Some("u1"))
            .await
            .unwrap();

        let thread = store.recent_history("ws", Some("t-1"), Some("u1"), 20).await.unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0].content, "side");

        let main = store.recent_history("ws", None, Some("u1"), 20).await.unwrap();
        assert_eq!(main[0].content, "main");
    }

    #[tokio::test]
    async fn test_history_is_scoped_by_user() {
        let store = store().await;
        store
            .save_turn("ws", &transcript("alice salary 90k?", "yes"), None, Some("alice"))
            .await
            .unwrap();

        let bob = store.recent_history("ws", None, Some("bob"), 20).await.unwrap();
        assert!(bob.is_empty());
        let anonymous = store.recent_history("ws", None, None, 20).await.unwrap();
        assert!(anonymous.is_empty());

        let alice = store.recent_history("ws", None, Some("alice"), 20).await.unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].content, "alice salary 90k?");
    }

    #[tokio::test]
    async fn test_saved_response_shape() {
        let store = store().await;
        let id = store
            .save_turn("ws", &transcript("hi", "hello"), None, None)
            .await
            .unwrap();
        let response: String =
            sqlx::query_scalar("SELECT response_json FROM workspace_chats WHERE id = ?")
                .bind(id)
                .fetch_one(&store.pool)
                .await
                .unwrap();
        let json: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(json["type"], "react");
        assert_eq!(json["text"], "hello");

        store
            .log_messages(id, &MessageLog::default())
            .await
            .unwrap();
        // second write for the same chat replaces the first
        store
            .log_messages(id, &MessageLog::default())
            .await
            .unwrap();
    }
}
