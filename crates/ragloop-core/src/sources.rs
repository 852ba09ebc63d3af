//! Source deduplication for stored transcripts.

use std::collections::HashSet;

use crate::models::RetrievedChunk;

/// Collapse sources sharing a `title::published` key, keeping the first.
///
/// Idempotent: deduplicating the output again returns it unchanged.
pub fn deduplicate_sources(sources: &[RetrievedChunk]) -> Vec<RetrievedChunk> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .filter(|source| seen.insert(source.source_key()))
        .cloned()
        .collect()
}
