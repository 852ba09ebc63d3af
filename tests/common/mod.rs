//! Scripted collaborators for driving the reasoning loop without a model,
//! an index, or a database.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ragloop::chats::{ChatStore, MessageLog};
use ragloop::config::{ReactConfig, Workspace, WorkspaceConfig};
use ragloop::error::LlmError;
use ragloop::llm::{ChatCompletion, Completion};
use ragloop::react::ReactDeps;
use ragloop::retrieval::DocumentSearch;
use ragloop::stream::StreamEmitter;
use ragloop_core::compress::{CompressionConfig, CompressionPolicy, TokenCounter};
use ragloop_core::models::{ChatMessage, ChatTranscript, RetrievedChunk, StreamChunk};
use ragloop_core::search::SearchResponse;

pub const SEARCH: &str =
    "Thought: I should look this up\nAction: search_documents\nAction Input: {\"query\": \"pto policy\"}";

pub fn search_for(query: &str) -> String {
    format!(
        "Thought: searching for {q}\nAction: search_documents\nAction Input: {{\"query\": \"{q}\"}}",
        q = query
    )
}

pub fn final_answer(answer: &str) -> String {
    format!("Thought: I have enough\nFinal Answer: {}", answer)
}

// ============ LLM ============

pub enum Reply {
    Text(String),
    Empty,
    Fail,
}

/// Answers from a queue and records every message list it was sent.
/// An exhausted queue answers with an absent completion.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Reply>>,
    pub calls: Mutex<Vec<(Vec<ChatMessage>, f32)>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn texts<S: Into<String>>(texts: Vec<S>) -> Arc<Self> {
        Self::new(texts.into_iter().map(|t| Reply::Text(t.into())).collect())
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_messages(&self) -> Vec<ChatMessage> {
        self.calls
            .lock()
            .unwrap()
            .last()
            .map(|(m, _)| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedLlm {
    fn default_temperature(&self) -> f32 {
        0.7
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        temperature: f32,
    ) -> Result<Completion, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((messages.to_vec(), temperature));
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Text(text)) => Ok(Completion::text(text)),
            Some(Reply::Fail) => Err(LlmError::Status {
                status: 500,
                body: "internal upstream stack trace".to_string(),
            }),
            Some(Reply::Empty) | None => Ok(Completion::default()),
        }
    }
}

// ============ Search ============

pub fn chunk(doc: &str, index: i64, title: &str, text: &str) -> RetrievedChunk {
    RetrievedChunk {
        doc_id: doc.to_string(),
        chunk_index: Some(index),
        text: text.to_string(),
        title: title.to_string(),
        published: "2024-01-01".to_string(),
        score: Some(0.9),
        is_adjacent_chunk: false,
    }
}

pub fn found(chunks: Vec<RetrievedChunk>) -> SearchResponse {
    SearchResponse {
        context_texts: chunks.iter().map(|c| c.text.clone()).collect(),
        sources: chunks,
        error_message: None,
    }
}

/// Returns the same response for every query and records the queries.
pub struct RecordingSearch {
    has_documents: bool,
    response: SearchResponse,
    pub queries: Mutex<Vec<String>>,
}

impl RecordingSearch {
    pub fn new(response: SearchResponse) -> Arc<Self> {
        Arc::new(Self {
            has_documents: true,
            response,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn empty_workspace() -> Arc<Self> {
        Arc::new(Self {
            has_documents: false,
            response: SearchResponse::default(),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl DocumentSearch for RecordingSearch {
    async fn has_vectorized_content(&self, _namespace: &str) -> bool {
        self.has_documents
    }

    async fn search(
        &self,
        _namespace: &str,
        query: &str,
        _settings: &WorkspaceConfig,
    ) -> SearchResponse {
        self.queries.lock().unwrap().push(query.to_string());
        self.response.clone()
    }
}

// ============ Chats ============

#[derive(Debug, Clone)]
pub struct SavedTurn {
    pub workspace: String,
    pub transcript: ChatTranscript,
    pub thread_id: Option<String>,
    pub user_id: Option<String>,
}

pub struct RecordingChats {
    fail: bool,
    history: Vec<ChatMessage>,
    /// `(thread_id, user_id)` of every history lookup.
    pub history_requests: Mutex<Vec<(Option<String>, Option<String>)>>,
    pub saved: Mutex<Vec<SavedTurn>>,
    pub logs: Mutex<Vec<(i64, MessageLog)>>,
}

impl RecordingChats {
    pub fn new() -> Arc<Self> {
        Self::build(false, Vec::new())
    }

    pub fn failing() -> Arc<Self> {
        Self::build(true, Vec::new())
    }

    pub fn with_history(history: Vec<ChatMessage>) -> Arc<Self> {
        Self::build(false, history)
    }

    fn build(fail: bool, history: Vec<ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            fail,
            history,
            history_requests: Mutex::new(Vec::new()),
            saved: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
        })
    }

    pub fn saved(&self) -> Vec<SavedTurn> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatStore for RecordingChats {
    async fn save_turn(
        &self,
        workspace_slug: &str,
        transcript: &ChatTranscript,
        thread_id: Option<&str>,
        user_id: Option<&str>,
    ) -> anyhow::Result<i64> {
        if self.fail {
            anyhow::bail!("database is locked");
        }
        let mut saved = self.saved.lock().unwrap();
        saved.push(SavedTurn {
            workspace: workspace_slug.to_string(),
            transcript: transcript.clone(),
            thread_id: thread_id.map(str::to_string),
            user_id: user_id.map(str::to_string),
        });
        Ok(saved.len() as i64)
    }

    async fn recent_history(
        &self,
        _workspace_slug: &str,
        thread_id: Option<&str>,
        user_id: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<Vec<ChatMessage>> {
        self.history_requests
            .lock()
            .unwrap()
            .push((thread_id.map(str::to_string), user_id.map(str::to_string)));
        let skip = self.history.len().saturating_sub(limit * 2);
        Ok(self.history[skip..].to_vec())
    }

    async fn log_messages(&self, chat_id: i64, log: &MessageLog) -> anyhow::Result<()> {
        self.logs.lock().unwrap().push((chat_id, log.clone()));
        Ok(())
    }
}

// ============ Emitters ============

/// Collects chunks in memory and reports closed once `close_after`
/// chunks have been emitted.
pub struct CollectingEmitter {
    chunks: Mutex<Vec<StreamChunk>>,
    close_after: Option<usize>,
    closed: AtomicBool,
    emitted: AtomicUsize,
}

impl CollectingEmitter {
    pub fn new() -> Self {
        Self::closing_after(None)
    }

    pub fn closing_after(close_after: Option<usize>) -> Self {
        let closed = close_after == Some(0);
        Self {
            chunks: Mutex::new(Vec::new()),
            close_after,
            closed: AtomicBool::new(closed),
            emitted: AtomicUsize::new(0),
        }
    }

    pub fn chunks(&self) -> Vec<StreamChunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.chunks()
            .into_iter()
            .filter_map(|c| c.text_response)
            .collect()
    }
}

impl StreamEmitter for CollectingEmitter {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, chunk: StreamChunk) {
        if self.is_closed() {
            return;
        }
        self.chunks.lock().unwrap().push(chunk);
        let emitted = self.emitted.fetch_add(1, Ordering::SeqCst) + 1;
        if self.close_after.is_some_and(|n| emitted >= n) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

// ============ Wiring ============

/// One token per whitespace-separated word.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

pub fn deps(
    llm: Arc<ScriptedLlm>,
    search: Arc<RecordingSearch>,
    chats: Arc<RecordingChats>,
) -> ReactDeps {
    ReactDeps {
        llm,
        search,
        chats,
        counter: Arc::new(WordCounter),
        compression: CompressionConfig {
            enabled: false,
            policy: CompressionPolicy::Proportional,
            context_window: 8192,
            token_buffer: 600,
        },
        limits: ReactConfig::default(),
    }
}

pub fn workspace() -> Workspace {
    Workspace {
        slug: "handbook".to_string(),
        settings: WorkspaceConfig {
            system_prompt: "You answer questions about the handbook.".to_string(),
            ..WorkspaceConfig::default()
        },
    }
}
