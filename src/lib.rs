//! # ragloop
//!
//! A retrieval-augmented chat orchestrator. For each user message it runs a
//! ReAct loop (Thought → Action → Observation), searching a workspace's
//! vector index when the model asks to, streams its reasoning and the final
//! answer to the client, and stores the turn with a structured trace.
//!
//! ## Architecture
//!
//! ```text
//!  client ──▶ ┌──────────┐   ┌─────────────┐   ┌────────────┐
//!   (SSE) ◀── │  server  │──▶│ react loop  │──▶│    llm     │
//!             └──────────┘   └──┬───────┬──┘   └────────────┘
//!                               │       │
//!                     ┌─────────▼──┐  ┌─▼────────┐
//!                     │ retrieval  │  │  chats   │
//!                     │ embed+store│  │ (SQLite) │
//!                     └─────┬──────┘  └──────────┘
//!                           ▼
//!         memory │ sqlite │ operator_filter │ range_filter
//! ```
//!
//! Runtime-free pieces (data model, output parser, similarity search with
//! adjacency stitching, compressor) live in the `ragloop-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! rloop init                                    # create database
//! rloop index chunks.jsonl --workspace handbook # embed pre-chunked text
//! rloop chat "How much PTO do I get?" --workspace handbook
//! rloop serve                                   # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`error`] | Typed errors at provider seams |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`embedding`] | Embedding providers and the batcher |
//! | [`llm`] | Chat completion client |
//! | [`tokens`] | Token counting for compression |
//! | [`sqlite_store`] | SQLite vector backend |
//! | [`filter_store`] | Filter-dialect remote vector backends |
//! | [`retrieval`] | Query embedding + backend selection |
//! | [`stream`] | Outbound chunk channel |
//! | [`chats`] | Chat persistence and history |
//! | [`react`] | Reasoning loop controller |
//! | [`index_cmd`] | `rloop index` |
//! | [`server`] | HTTP/SSE server |

pub mod chats;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod filter_store;
pub mod index_cmd;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod react;
pub mod retrieval;
pub mod server;
pub mod sqlite_store;
pub mod stream;
pub mod tokens;
