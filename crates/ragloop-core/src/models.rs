//! Core data types shared across the reasoning loop, retrieval, and streaming.
//!
//! Field names serialize in camelCase because these records cross the wire
//! (stream chunks) and land in stored chat records read by the same clients.

use serde::{Deserialize, Serialize};

/// Speaker of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the ordered conversation sent to the language model.
///
/// Insertion order defines LLM context order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A text chunk returned by a vector backend.
///
/// Two identity keys apply to chunks:
/// - `docId-chunkIndex` ([`RetrievedChunk::exclusion_key`]) prevents the same
///   physical chunk from being stitched in twice during one retrieval call.
/// - `title::published` ([`RetrievedChunk::source_key`]) collapses sources
///   for the final transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    pub doc_id: String,
    /// Position of the chunk within its document. `None` for legacy
    /// embeddings written before chunk positions were recorded.
    #[serde(default)]
    pub chunk_index: Option<i64>,
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub published: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default)]
    pub is_adjacent_chunk: bool,
}

impl RetrievedChunk {
    /// `docId-chunkIndex`, or `None` when the chunk carries no index.
    pub fn exclusion_key(&self) -> Option<String> {
        self.chunk_index
            .map(|index| crate::store::exclusion_key(&self.doc_id, index))
    }

    /// `title::published`, the key used to collapse sources.
    pub fn source_key(&self) -> String {
        format!("{}::{}", self.title, self.published)
    }
}

/// A chunk ready to be written into a vector backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub doc_id: String,
    #[serde(default)]
    pub chunk_index: Option<i64>,
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub published: String,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

/// Structured reading of one LLM completion.
///
/// Produced only by [`crate::parser::parse_react_output`]; the rest of the
/// system never looks at the raw regex matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedOutput {
    Action {
        thought: String,
        action: String,
        #[serde(rename = "actionInput")]
        action_input: String,
    },
    FinalAnswer {
        thought: String,
        answer: String,
    },
    Incomplete {
        text: String,
    },
}

impl ParsedOutput {
    pub fn is_final_answer(&self) -> bool {
        matches!(self, ParsedOutput::FinalAnswer { .. })
    }

    /// The thought, if this variant carries a non-empty one.
    pub fn thought(&self) -> Option<&str> {
        match self {
            ParsedOutput::Action { thought, .. } | ParsedOutput::FinalAnswer { thought, .. }
                if !thought.is_empty() =>
            {
                Some(thought.as_str())
            }
            _ => None,
        }
    }
}

/// Trace entry recording one completion and how it was parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningStep {
    pub iteration: u32,
    pub raw_output: String,
    pub parsed: ParsedOutput,
}

/// Trace entry recording the observation produced for an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRecord {
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    pub observation_text: String,
    pub source_count: usize,
}

/// One element of the reasoning trace stored with each chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceEntry {
    Step(ReasoningStep),
    Observation(ObservationRecord),
}

impl TraceEntry {
    pub fn is_step(&self) -> bool {
        matches!(self, TraceEntry::Step(_))
    }

    pub fn iteration(&self) -> u32 {
        match self {
            TraceEntry::Step(s) => s.iteration,
            TraceEntry::Observation(o) => o.iteration,
        }
    }
}

/// The record handed to persistence once per completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTranscript {
    pub prompt_text: String,
    pub final_answer_text: String,
    pub sources: Vec<RetrievedChunk>,
    pub react_trace: Vec<TraceEntry>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
}

impl ChatTranscript {
    /// Shape of the stored chat response column:
    /// `{text, sources, type: "react", attachments, reactTrace}`.
    pub fn response_json(&self) -> serde_json::Value {
        serde_json::json!({
            "text": self.final_answer_text,
            "sources": self.sources,
            "type": "react",
            "attachments": self.attachments,
            "reactTrace": self.react_trace,
        })
    }
}

/// Discriminant of a [`StreamChunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkType {
    StatusResponse,
    TextResponseChunk,
    FinalizeResponseStream,
    Abort,
}

/// One record of the outbound stream protocol.
///
/// Created per emission and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    pub uuid: String,
    #[serde(rename = "type")]
    pub kind: ChunkType,
    pub text_response: Option<String>,
    #[serde(default)]
    pub sources: Vec<RetrievedChunk>,
    pub close: bool,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
}

impl StreamChunk {
    pub fn status(uuid: &str, text: impl Into<String>) -> Self {
        Self {
            uuid: uuid.to_string(),
            kind: ChunkType::StatusResponse,
            text_response: Some(text.into()),
            sources: Vec::new(),
            close: false,
            error: None,
            chat_id: None,
        }
    }

    /// The aggregated final answer. Never token-streamed.
    pub fn answer(uuid: &str, text: impl Into<String>, sources: Vec<RetrievedChunk>) -> Self {
        Self {
            uuid: uuid.to_string(),
            kind: ChunkType::TextResponseChunk,
            text_response: Some(text.into()),
            sources,
            close: true,
            error: None,
            chat_id: None,
        }
    }

    pub fn finalize(uuid: &str, chat_id: i64) -> Self {
        Self {
            uuid: uuid.to_string(),
            kind: ChunkType::FinalizeResponseStream,
            text_response: None,
            sources: Vec::new(),
            close: true,
            error: None,
            chat_id: Some(chat_id),
        }
    }

    pub fn abort(uuid: &str, error: impl Into<String>) -> Self {
        Self {
            uuid: uuid.to_string(),
            kind: ChunkType::Abort,
            text_response: None,
            sources: Vec::new(),
            close: true,
            error: Some(error.into()),
            chat_id: None,
        }
    }

    /// `true` for `finalizeResponseStream` and `abort`, the two mutually
    /// exclusive end-of-turn events.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ChunkType::FinalizeResponseStream | ChunkType::Abort
        )
    }
}
