//! Prompt text and the fixed strings the loop streams or feeds back.

/// The only action the model may take.
pub const SEARCH_ACTION: &str = "search_documents";

pub const SUMMARY_REQUEST: &str = "You have reached the maximum number of search iterations. Based on all the information gathered so far, please provide your Final Answer now.";

pub const SUMMARY_FALLBACK: &str = "Unable to generate a response after multiple reasoning steps.";

pub const NO_DOCUMENTS: &str = "No documents are embedded in this workspace. No search results found.";
pub const NO_RESULTS: &str = "No relevant documents found for this search query.";

pub const TRUNCATION_SUFFIX: &str = "\n...(truncated)";

// Client-facing abort texts. Internal error detail goes to the log only.
pub const ABORT_EMPTY_COMPLETION: &str = "LLM returned an empty response during ReAct reasoning.";
pub const ABORT_GENERIC: &str = "An error occurred while processing your request. Please try again.";
pub const ABORT_EMPTY_ANSWER: &str = "Unable to generate a response.";

pub const MAX_STEPS_STATUS: &str =
    "**Reached maximum reasoning steps.** Summarizing collected information...";

/// Workspace prompt followed by the tool description and answer format.
///
/// An empty base prompt still gets the instructions.
pub fn react_system_prompt(base: &str) -> String {
    format!(
        r#"{base}

One tool is available to help you answer the user's question:

Tool: {SEARCH_ACTION}
Description: Searches the documents of this workspace for relevant passages. Use it whenever the answer depends on information from those documents.
Parameters: {{"query": "search query string"}}

Every response must follow this format:

Thought: what information you still need and why
Action: {SEARCH_ACTION}
Action Input: {{"query": "your search query"}}

Once you receive an Observation with the search results, either search again or finish:

Thought: whether the results are enough to answer
Final Answer: your complete answer based on what you found

Rules:
- Always begin with a Thought
- Search as many times as you need to gather enough information
- Give a Final Answer as soon as you have enough information
- If no relevant documents turn up, give a Final Answer from general knowledge and say that no relevant documents were found
- Keep search queries short and specific"#
    )
}

pub fn thought_status(thought: &str) -> String {
    format!("**Thought:** {}", thought)
}

pub fn searching_status(query: &str) -> String {
    format!("**Searching documents:** \"{}\"", query)
}

pub fn results_status(count: usize) -> String {
    format!("**Search results:** {} document(s) found", count)
}

/// Fed back to the model when it names an action other than [`SEARCH_ACTION`].
pub fn unknown_action_observation(action: &str) -> String {
    format!(
        "Unknown action \"{}\". The only available action is \"{}\". Please try again.",
        action, SEARCH_ACTION
    )
}

pub fn search_failed_observation(message: &str) -> String {
    format!("Search failed: {}", message)
}

/// `[1] first\n\n[2] second ...`
pub fn numbered_results(texts: &[String]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("[{}] {}", i + 1, text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cut `text` to `max_chars` characters and mark the cut.
pub fn truncate_observation(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => {
            let mut cut = text[..byte_offset].to_string();
            cut.push_str(TRUNCATION_SUFFIX);
            cut
        }
        None => text,
    }
}

pub fn observation_message(observation: &str) -> String {
    format!("Observation: {}", observation)
}
