//! The ReAct reasoning loop.
//!
//! One call to [`begin_reasoning_turn`] handles one user message:
//!
//! ```text
//! Reasoning ──▶ Searching ──▶ Reasoning ... ──▶ Finalizing ──▶ Done
//!     │                                              ▲
//!     └── iteration cap ──▶ one summary completion ──┘
//!     └── empty completion / provider error ──▶ Aborted
//! ```
//!
//! Each iteration makes one non-streaming completion, parses it, and either
//! finishes, runs a document search, or feeds back an "unknown action"
//! observation. Progress is streamed as `statusResponse` chunks; the answer
//! goes out as a single `textResponseChunk` followed by
//! `finalizeResponseStream`, or the turn ends with one `abort`.
//!
//! The emitter's closed flag is checked before and after every completion
//! and search. A client that leaves mid-loop ends the turn with no further
//! side effects and nothing persisted.

pub mod prompt;

use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;

use ragloop_core::compress::{compress_messages, CompressionConfig, TokenCounter};
use ragloop_core::models::{
    ChatMessage, ChatTranscript, ObservationRecord, ParsedOutput, ReasoningStep, RetrievedChunk,
    StreamChunk, TraceEntry,
};
use ragloop_core::parser::parse_react_output;
use ragloop_core::sources::deduplicate_sources;

use crate::chats::{ChatStore, MessageLog, SqliteChatStore};
use crate::config::{Config, ReactConfig, Workspace};
use crate::embedding::{self, EmbeddingBatcher};
use crate::error::TurnError;
use crate::llm::{self, ChatCompletion};
use crate::retrieval::{self, DocumentSearch, Retriever};
use crate::stream::StreamEmitter;
use crate::tokens::TiktokenCounter;

/// Collaborators shared by every turn.
pub struct ReactDeps {
    pub llm: Arc<dyn ChatCompletion>,
    pub search: Arc<dyn DocumentSearch>,
    pub chats: Arc<dyn ChatStore>,
    pub counter: Arc<dyn TokenCounter>,
    pub compression: CompressionConfig,
    pub limits: ReactConfig,
}

impl ReactDeps {
    /// Wire the configured providers, backend, and SQLite chat store.
    pub fn from_config(config: &Config, pool: &SqlitePool) -> anyhow::Result<Self> {
        let provider = embedding::create_provider(&config.embedding)?;
        let batcher = Arc::new(EmbeddingBatcher::from_config(provider, &config.embedding));
        let store = retrieval::create_store(config, pool)?;

        Ok(Self {
            llm: llm::create_llm(&config.llm)?,
            search: Arc::new(Retriever::new(batcher, store)),
            chats: Arc::new(SqliteChatStore::new(pool.clone())),
            counter: Arc::new(TiktokenCounter::for_model(&config.llm.model)?),
            compression: config.compression_config(),
            limits: config.react.clone(),
        })
    }
}

/// One user message and its context.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub message: String,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    /// Stored with the chat record; never sent to the model.
    pub attachments: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// An answer was produced. `chat_id` is `None` when persisting it failed.
    Completed { chat_id: Option<i64> },
    /// A single `abort` chunk ended the turn (unless the client had left).
    Aborted,
    /// The client went away mid-loop; nothing was persisted.
    Disconnected,
}

enum LoopEnd {
    Answer(String),
    Disconnected,
}

/// Per-turn state. Owned by one turn, never shared.
struct Turn<'a> {
    deps: &'a ReactDeps,
    emitter: &'a dyn StreamEmitter,
    workspace: &'a Workspace,
    uuid: String,
    temperature: f32,
    has_documents: bool,
    messages: Vec<ChatMessage>,
    trace: Vec<TraceEntry>,
    sources: Vec<RetrievedChunk>,
    rag_context: Vec<String>,
}

/// Run one reasoning turn to completion, streaming through `emitter`.
pub async fn begin_reasoning_turn(
    deps: &ReactDeps,
    emitter: &dyn StreamEmitter,
    workspace: &Workspace,
    request: TurnRequest,
) -> TurnOutcome {
    let settings = &workspace.settings;
    let slug = workspace.slug.as_str();

    let has_documents = deps.search.has_vectorized_content(slug).await;

    let history = match deps
        .chats
        .recent_history(
            slug,
            request.thread_id.as_deref(),
            request.user_id.as_deref(),
            settings.history_limit,
        )
        .await
    {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(workspace = slug, error = %e, "failed to load chat history");
            Vec::new()
        }
    };

    let system_prompt = prompt::react_system_prompt(&settings.system_prompt);
    let mut initial = Vec::with_capacity(history.len() + 2);
    initial.push(ChatMessage::system(system_prompt.clone()));
    initial.extend(history.iter().cloned());
    initial.push(ChatMessage::user(request.message.clone()));
    let messages = compress_messages(initial, &deps.compression, deps.counter.as_ref());

    let mut turn = Turn {
        deps,
        emitter,
        workspace,
        uuid: uuid::Uuid::new_v4().to_string(),
        temperature: settings
            .temperature
            .unwrap_or_else(|| deps.llm.default_temperature()),
        has_documents,
        messages: messages.clone(),
        trace: Vec::new(),
        sources: Vec::new(),
        rag_context: Vec::new(),
    };

    tracing::info!(
        workspace = slug,
        uuid = %turn.uuid,
        has_documents,
        history = history.len(),
        "starting reasoning turn"
    );

    let answer = match turn.run().await {
        Ok(LoopEnd::Answer(answer)) => answer,
        Ok(LoopEnd::Disconnected) => {
            tracing::info!(workspace = slug, "client disconnected; abandoning turn");
            return TurnOutcome::Disconnected;
        }
        Err(err) => {
            let client_message = match &err {
                TurnError::EmptyCompletion => prompt::ABORT_EMPTY_COMPLETION,
                TurnError::Llm(_) => prompt::ABORT_GENERIC,
            };
            tracing::error!(workspace = slug, error = %err, "reasoning turn failed");
            turn.abort(client_message);
            return TurnOutcome::Aborted;
        }
    };

    if answer.trim().is_empty() {
        tracing::error!(workspace = slug, "final answer is empty");
        turn.abort(prompt::ABORT_EMPTY_ANSWER);
        return TurnOutcome::Aborted;
    }

    let log = MessageLog {
        system_prompt,
        user_prompt: request.message.clone(),
        llm_response: answer.clone(),
        rag_context: std::mem::take(&mut turn.rag_context),
        chat_history: history,
        compressed_messages: messages,
    };
    turn.finish(answer, request, log).await
}

impl Turn<'_> {
    fn status(&self, text: String) {
        if !self.emitter.is_closed() {
            self.emitter.emit(StreamChunk::status(&self.uuid, text));
        }
    }

    fn abort(&self, message: &str) {
        if !self.emitter.is_closed() {
            self.emitter.emit(StreamChunk::abort(&self.uuid, message));
        }
    }

    async fn complete(&self) -> Result<Option<String>, TurnError> {
        let completion = self
            .deps
            .llm
            .complete(&self.messages, self.temperature)
            .await?;
        Ok(completion.non_empty().map(str::to_string))
    }

    async fn run(&mut self) -> Result<LoopEnd, TurnError> {
        for iteration in 1..=self.deps.limits.max_iterations {
            if self.emitter.is_closed() {
                return Ok(LoopEnd::Disconnected);
            }
            let raw = self.complete().await?;
            if self.emitter.is_closed() {
                return Ok(LoopEnd::Disconnected);
            }
            let Some(raw) = raw else {
                tracing::error!(workspace = %self.workspace.slug, iteration, "empty completion");
                return Err(TurnError::EmptyCompletion);
            };

            let parsed = parse_react_output(Some(&raw));
            self.trace.push(TraceEntry::Step(ReasoningStep {
                iteration,
                raw_output: raw.clone(),
                parsed: parsed.clone(),
            }));
            if let Some(thought) = parsed.thought() {
                self.status(prompt::thought_status(thought));
            }

            match parsed {
                ParsedOutput::FinalAnswer { answer, .. } => return Ok(LoopEnd::Answer(answer)),
                ParsedOutput::Action { action, .. } if action != prompt::SEARCH_ACTION => {
                    tracing::debug!(iteration, action = %action, "unknown action");
                    self.messages.push(ChatMessage::assistant(raw));
                    self.messages.push(ChatMessage::user(prompt::observation_message(
                        &prompt::unknown_action_observation(&action),
                    )));
                    self.trace.push(TraceEntry::Observation(ObservationRecord {
                        iteration,
                        search_query: None,
                        observation_text: format!("Unknown action: {}", action),
                        source_count: 0,
                    }));
                }
                ParsedOutput::Action { action_input, .. } => {
                    self.status(prompt::searching_status(&action_input));
                    let Some((observation, count)) = self.observe(&action_input).await else {
                        return Ok(LoopEnd::Disconnected);
                    };
                    let observation = prompt::truncate_observation(
                        observation,
                        self.deps.limits.observation_max_chars,
                    );
                    self.status(prompt::results_status(count));

                    self.trace.push(TraceEntry::Observation(ObservationRecord {
                        iteration,
                        search_query: Some(action_input),
                        observation_text: observation.clone(),
                        source_count: count,
                    }));
                    self.messages.push(ChatMessage::assistant(raw));
                    self.messages
                        .push(ChatMessage::user(prompt::observation_message(&observation)));
                }
                ParsedOutput::Incomplete { text } if text.is_empty() => {
                    tracing::warn!(
                        workspace = %self.workspace.slug,
                        iteration,
                        "completion was blank; asking for a summary"
                    );
                    break;
                }
                ParsedOutput::Incomplete { text } => {
                    let preview: String = text.chars().take(200).collect();
                    tracing::warn!(
                        workspace = %self.workspace.slug,
                        iteration,
                        output = %preview,
                        "completion did not follow the ReAct format; using it as the answer"
                    );
                    return Ok(LoopEnd::Answer(text));
                }
            }
        }

        self.summarize().await
    }

    /// Run one search and describe the result. `None` if the client left
    /// while the search was in flight.
    async fn observe(&mut self, query: &str) -> Option<(String, usize)> {
        if !self.has_documents {
            return Some((prompt::NO_DOCUMENTS.to_string(), 0));
        }
        if self.emitter.is_closed() {
            return None;
        }

        let response = self
            .deps
            .search
            .search(&self.workspace.slug, query, &self.workspace.settings)
            .await;
        if self.emitter.is_closed() {
            return None;
        }

        if let Some(message) = response.error_message {
            tracing::error!(
                workspace = %self.workspace.slug,
                query,
                error = %message,
                "document search failed"
            );
            return Some((prompt::search_failed_observation(&message), 0));
        }
        if response.context_texts.is_empty() {
            return Some((prompt::NO_RESULTS.to_string(), 0));
        }

        let count = response.sources.len();
        let observation = prompt::numbered_results(&response.context_texts);
        self.rag_context.extend(response.context_texts);
        self.sources.extend(response.sources);
        Some((observation, count))
    }

    /// The iteration cap was hit or the model went blank: ask once more
    /// for a final answer.
    async fn summarize(&mut self) -> Result<LoopEnd, TurnError> {
        if self.emitter.is_closed() {
            return Ok(LoopEnd::Disconnected);
        }
        self.status(prompt::MAX_STEPS_STATUS.to_string());
        self.messages.push(ChatMessage::user(prompt::SUMMARY_REQUEST));

        let raw = self.complete().await?;
        if self.emitter.is_closed() {
            return Ok(LoopEnd::Disconnected);
        }

        let answer = match raw.filter(|r| !r.trim().is_empty()) {
            None => {
                tracing::error!(
                    workspace = %self.workspace.slug,
                    "summary completion was empty"
                );
                prompt::SUMMARY_FALLBACK.to_string()
            }
            Some(raw) => match parse_react_output(Some(&raw)) {
                ParsedOutput::FinalAnswer { answer, .. } => answer,
                ParsedOutput::Incomplete { text } if !text.is_empty() => text,
                _ => raw.trim().to_string(),
            },
        };
        Ok(LoopEnd::Answer(answer))
    }

    async fn finish(self, answer: String, request: TurnRequest, log: MessageLog) -> TurnOutcome {
        let slug = self.workspace.slug.as_str();
        let sources = deduplicate_sources(&self.sources);

        if !self.emitter.is_closed() {
            self.emitter
                .emit(StreamChunk::answer(&self.uuid, answer.clone(), sources.clone()));
        }

        let transcript = ChatTranscript {
            prompt_text: request.message,
            final_answer_text: answer,
            sources,
            react_trace: self.trace,
            attachments: request.attachments,
        };

        let chat_id = match self
            .deps
            .chats
            .save_turn(
                slug,
                &transcript,
                request.thread_id.as_deref(),
                request.user_id.as_deref(),
            )
            .await
        {
            Ok(id) => id,
            Err(e) => {
                // The answer already closed the stream for the client.
                tracing::error!(workspace = slug, error = %e, "failed to persist chat");
                return TurnOutcome::Completed { chat_id: None };
            }
        };

        if let Err(e) = self.deps.chats.log_messages(chat_id, &log).await {
            tracing::warn!(workspace = slug, chat_id, error = %e, "failed to write message log");
        }

        if !self.emitter.is_closed() {
            self.emitter.emit(StreamChunk::finalize(&self.uuid, chat_id));
        }
        tracing::info!(
            workspace = slug,
            chat_id,
            steps = transcript.react_trace.len(),
            sources = transcript.sources.len(),
            "reasoning turn complete"
        );
        TurnOutcome::Completed {
            chat_id: Some(chat_id),
        }
    }
}
