//! ReAct output parser.
//!
//! Turns one free-text LLM completion into a [`ParsedOutput`]. Matching is
//! case-insensitive and tolerant of extra whitespace around markers.
//!
//! # Precedence
//!
//! 1. `Final Answer:` anywhere in the text wins, even when a well-formed
//!    `Action:` block is also present.
//! 2. `Action:` followed on a later line by `Action Input:` yields an action.
//! 3. Anything else is [`ParsedOutput::Incomplete`] carrying the trimmed text.
//!
//! The thought is extracted independently: the text between `Thought:` and
//! the next `Action:` / `Final Answer:` marker, or empty when absent.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::ParsedOutput;

static FINAL_ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)Final\s*Answer\s*:\s*(.*)\z").expect("final answer regex is valid")
});
static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)Action\s*:\s*(\S+)\s*\n\s*Action\s*Input\s*:\s*(.*)\z")
        .expect("action regex is valid")
});
static THOUGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)Thought\s*:\s*(.*?)\n\s*(?:Action|Final\s*Answer)\s*:")
        .expect("thought regex is valid")
});

/// Parse one completion. `None` and blank input yield `Incomplete { text: "" }`.
pub fn parse_react_output(text: Option<&str>) -> ParsedOutput {
    let trimmed = text.unwrap_or_default().trim();
    if trimmed.is_empty() {
        return ParsedOutput::Incomplete {
            text: String::new(),
        };
    }

    if let Some(caps) = FINAL_ANSWER_RE.captures(trimmed) {
        return ParsedOutput::FinalAnswer {
            thought: extract_thought(trimmed),
            answer: caps[1].trim().to_string(),
        };
    }

    if let Some(caps) = ACTION_RE.captures(trimmed) {
        return ParsedOutput::Action {
            thought: extract_thought(trimmed),
            action: caps[1].trim().to_string(),
            action_input: read_action_input(caps[2].trim()),
        };
    }

    ParsedOutput::Incomplete {
        text: trimmed.to_string(),
    }
}

/// Use the JSON `query` string when present, otherwise the raw input.
fn read_action_input(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => match value.get("query").and_then(|q| q.as_str()) {
            Some(query) if !query.is_empty() => query.to_string(),
            _ => raw.to_string(),
        },
        Err(e) => {
            if raw.starts_with('{') {
                let preview: String = raw.chars().take(200).collect();
                tracing::warn!(
                    raw = %preview,
                    error = %e,
                    "malformed JSON in Action Input"
                );
            }
            raw.to_string()
        }
    }
}

fn extract_thought(text: &str) -> String {
    THOUGHT_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn incomplete(text: &str) -> ParsedOutput {
        ParsedOutput::Incomplete {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_empty_inputs_are_incomplete() {
        assert_eq!(parse_react_output(None), incomplete(""));
        assert_eq!(parse_react_output(Some("")), incomplete(""));
        assert_eq!(parse_react_output(Some("   \n ")), incomplete(""));
    }

    #[test]
    fn test_action_with_json_query() {
        let out = parse_react_output(Some(
            "Thought: I need the leave policy\nAction: search_documents\nAction Input: {\"query\": \"leave policy\"}",
        ));
        assert_eq!(
            out,
            ParsedOutput::Action {
                thought: "I need the leave policy".into(),
                action: "search_documents".into(),
                action_input: "leave policy".into(),
            }
        );
    }

    #[test]
    fn test_action_with_plain_input() {
        let out = parse_react_output(Some(
            "Action: search_documents\nAction Input: vacation days",
        ));
        assert_eq!(
            out,
            ParsedOutput::Action {
                thought: String::new(),
                action: "search_documents".into(),
                action_input: "vacation days".into(),
            }
        );
    }

    #[test]
    fn test_json_without_query_is_kept_verbatim() {
        let out = parse_react_output(Some(
            "Action: search_documents\nAction Input: {\"q\": \"x\"}",
        ));
        match out {
            ParsedOutput::Action { action_input, .. } => assert_eq!(action_input, "{\"q\": \"x\"}"),
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json_is_kept_verbatim() {
        let out = parse_react_output(Some(
            "Action: search_documents\nAction Input: {\"query\": \"broken",
        ));
        match out {
            ParsedOutput::Action { action_input, .. } => {
                assert_eq!(action_input, "{\"query\": \"broken")
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn test_final_answer_beats_action() {
        let text = "Thought: done\nAction: search_documents\nAction Input: {\"query\": \"x\"}\nFinal Answer: 42";
        let out = parse_react_output(Some(text));
        assert!(out.is_final_answer());
        match out {
            ParsedOutput::FinalAnswer { answer, thought } => {
                assert_eq!(answer, "42");
                assert_eq!(thought, "done");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_final_answer_is_case_insensitive_and_multiline() {
        let out = parse_react_output(Some(
            "thought: summarising\nFINAL ANSWER:  line one\nline two  ",
        ));
        assert_eq!(
            out,
            ParsedOutput::FinalAnswer {
                thought: "summarising".into(),
                answer: "line one\nline two".into(),
            }
        );
    }

    #[test]
    fn test_action_without_input_is_incomplete() {
        let text = "Thought: hmm\nAction: search_documents";
        assert_eq!(parse_react_output(Some(text)), incomplete(text));
    }

    #[test]
    fn test_plain_text_is_incomplete_and_trimmed() {
        assert_eq!(
            parse_react_output(Some("  The answer is blue.  ")),
            incomplete("The answer is blue.")
        );
    }

    #[test]
    fn test_thought_is_non_greedy() {
        let text = "Thought: first\nAction: search_documents\nAction Input: a\nThought: second\nAction: x";
        match parse_react_output(Some(text)) {
            ParsedOutput::Action { thought, .. } => assert_eq!(thought, "first"),
            other => panic!("expected action, got {:?}", other),
        }
    }
}
