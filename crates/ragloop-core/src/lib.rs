//! # ragloop core
//!
//! Runtime-free logic for the ragloop reasoning orchestrator: the data
//! model shared by the loop and its collaborators, the ReAct output
//! parser, the vector store abstraction with adjacent-chunk stitching,
//! source deduplication, and context-window compression.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Everything
//! that talks to the outside world lives in the `ragloop` application crate
//! and plugs in through the traits defined here.

pub mod compress;
pub mod models;
pub mod parser;
pub mod search;
pub mod sources;
pub mod store;
