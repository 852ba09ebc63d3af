//! Context-window compression.
//!
//! Fits `[system, ...history, user]` into a model's context window before
//! the first completion call. Two policies are available:
//!
//! | Policy | Behaviour |
//! |--------|-----------|
//! | [`CompressionPolicy::Proportional`] | system ≤ 15 %, history ≤ 15 %, user ≤ 70 % of the window minus the buffer, each enforced independently |
//! | [`CompressionPolicy::HistoryOnly`] | system and user kept verbatim; history gets whatever remains |
//!
//! Oversized text is truncated in the middle: the head and tail are kept and
//! [`TRUNCATION_MARKER`] replaces the middle. History is trimmed oldest-first
//! by dropping whole messages.

use serde::Deserialize;

use crate::models::{ChatMessage, Role};

pub const TRUNCATION_MARKER: &str = "--prompt truncated for brevity--";

const SYSTEM_SHARE: f64 = 0.15;
const HISTORY_SHARE: f64 = 0.15;
const USER_SHARE: f64 = 0.70;
const SATURATION_WARN_RATIO: f64 = 0.9;

/// Token-counting capability supplied by the application.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressionPolicy {
    #[default]
    Proportional,
    HistoryOnly,
}

#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub policy: CompressionPolicy,
    /// Model context window in tokens.
    pub context_window: usize,
    /// Tokens held back for the completion itself.
    pub token_buffer: usize,
}

struct Parts {
    system: Option<ChatMessage>,
    history: Vec<ChatMessage>,
    user: Option<ChatMessage>,
}

fn split(mut messages: Vec<ChatMessage>) -> Parts {
    let user = match messages.last() {
        Some(m) if m.role == Role::User => messages.pop(),
        _ => None,
    };
    let system = match messages.first() {
        Some(m) if m.role == Role::System => Some(messages.remove(0)),
        _ => None,
    };
    Parts {
        system,
        history: messages,
        user,
    }
}

fn join(parts: Parts) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(parts.history.len() + 2);
    out.extend(parts.system);
    out.extend(parts.history);
    out.extend(parts.user);
    out
}

fn share(total: usize, ratio: f64) -> usize {
    (total as f64 * ratio).floor() as usize
}

/// Compress a message set according to `config`.
///
/// Returns the input unchanged when compression is disabled.
pub fn compress_messages(
    messages: Vec<ChatMessage>,
    config: &CompressionConfig,
    counter: &dyn TokenCounter,
) -> Vec<ChatMessage> {
    if !config.enabled {
        return messages;
    }

    let available = config.context_window.saturating_sub(config.token_buffer);
    let mut parts = split(messages);

    let system_tokens = parts
        .system
        .as_ref()
        .map(|m| counter.count(&m.content))
        .unwrap_or(0);
    let user_tokens = parts
        .user
        .as_ref()
        .map(|m| counter.count(&m.content))
        .unwrap_or(0);

    if (system_tokens + user_tokens) as f64 > config.context_window as f64 * SATURATION_WARN_RATIO {
        tracing::warn!(
            system_tokens,
            user_tokens,
            context_window = config.context_window,
            policy = ?config.policy,
            "system prompt and user message alone fill more than 90% of the context window"
        );
    }

    match config.policy {
        CompressionPolicy::HistoryOnly => {
            let budget = available.saturating_sub(system_tokens + user_tokens);
            let before = parts.history.len();
            parts.history = trim_history(parts.history, budget, counter);
            tracing::info!(
                budget,
                kept = parts.history.len(),
                dropped = before - parts.history.len(),
                "compressed history only"
            );
            join(parts)
        }
        CompressionPolicy::Proportional => {
            let user_budget = share(available, USER_SHARE);
            if user_tokens > user_budget {
                if let Some(user) = parts.user {
                    tracing::info!(
                        user_tokens,
                        user_budget,
                        "user message exceeds its share; sending truncated user message alone"
                    );
                    return vec![ChatMessage::user(truncate_middle(
                        &user.content,
                        user_budget,
                        counter,
                    ))];
                }
            }

            let system_budget = share(available, SYSTEM_SHARE);
            if system_tokens > system_budget {
                parts.system = parts
                    .system
                    .map(|m| ChatMessage::system(truncate_middle(&m.content, system_budget, counter)));
            }

            let history_budget = share(available, HISTORY_SHARE);
            let before = parts.history.len();
            parts.history = trim_history(parts.history, history_budget, counter);

            tracing::info!(
                system_tokens,
                user_tokens,
                history_kept = parts.history.len(),
                history_dropped = before - parts.history.len(),
                "compressed prompt"
            );
            join(parts)
        }
    }
}

/// Drop the oldest history messages until the rest fit in `budget` tokens.
fn trim_history(
    history: Vec<ChatMessage>,
    budget: usize,
    counter: &dyn TokenCounter,
) -> Vec<ChatMessage> {
    let costs: Vec<usize> = history.iter().map(|m| counter.count(&m.content)).collect();
    let mut total: usize = costs.iter().sum();
    let mut start = 0;
    while total > budget && start < history.len() {
        total -= costs[start];
        start += 1;
    }
    history.into_iter().skip(start).collect()
}

/// Keep the head and tail of `text` within `budget` tokens, marker in the middle.
///
/// Text already within budget is returned unchanged. Otherwise the result
/// always contains [`TRUNCATION_MARKER`], even when the budget leaves no
/// room for content.
pub fn truncate_middle(text: &str, budget: usize, counter: &dyn TokenCounter) -> String {
    if counter.count(text) <= budget {
        return text.to_string();
    }
    let available = budget.saturating_sub(counter.count(TRUNCATION_MARKER));
    let head_budget = available / 2;
    let tail_budget = available - head_budget;

    let head = longest_prefix(text, head_budget, counter);
    let tail = longest_suffix(&text[head.len()..], tail_budget, counter);
    format!("{}\n{}\n{}", head.trim_end(), TRUNCATION_MARKER, tail.trim_start())
}

fn char_bounds(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

fn longest_prefix<'a>(text: &'a str, budget: usize, counter: &dyn TokenCounter) -> &'a str {
    let bounds = char_bounds(text);
    let (mut lo, mut hi) = (0, bounds.len() - 1);
    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if counter.count(&text[..bounds[mid]]) <= budget {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    &text[..bounds[lo]]
}

fn longest_suffix<'a>(text: &'a str, budget: usize, counter: &dyn TokenCounter) -> &'a str {
    let bounds = char_bounds(text);
    let (mut lo, mut hi) = (0, bounds.len() - 1);
    while lo < hi {
        let mid = (lo + hi) / 2;
        if counter.count(&text[bounds[mid]..]) <= budget {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    &text[bounds[lo]..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// One token per whitespace-separated word.
    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn words(n: usize, prefix: &str) -> String {
        (0..n)
            .map(|i| format!("{}{}", prefix, i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn config(policy: CompressionPolicy, window: usize) -> CompressionConfig {
        CompressionConfig {
            enabled: true,
            policy,
            context_window: window,
            token_buffer: 0,
        }
    }

    #[test]
    fn test_disabled_passes_through() {
        let messages = vec![
            ChatMessage::system(words(500, "s")),
            ChatMessage::user(words(500, "u")),
        ];
        let cfg = CompressionConfig {
            enabled: false,
            ..config(CompressionPolicy::Proportional, 10)
        };
        assert_eq!(compress_messages(messages.clone(), &cfg, &WordCounter), messages);
    }

    #[test]
    fn test_fitting_messages_unchanged() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("hello"),
            ChatMessage::assistant("hi"),
            ChatMessage::user("what now"),
        ];
        let out = compress_messages(
            messages.clone(),
            &config(CompressionPolicy::Proportional, 1000),
            &WordCounter,
        );
        assert_eq!(out, messages);
    }

    #[test]
    fn test_oversized_user_sent_alone_with_marker() {
        let messages = vec![
            ChatMessage::system("system prompt"),
            ChatMessage::user("old"),
            ChatMessage::user(words(200, "w")),
        ];
        let out = compress_messages(
            messages,
            &config(CompressionPolicy::Proportional, 100),
            &WordCounter,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
        assert!(out[0].content.contains(TRUNCATION_MARKER));
        assert!(out[0].content.starts_with("w0"));
        assert!(out[0].content.ends_with("w199"));
        assert!(WordCounter.count(&out[0].content) <= 70);
    }

    #[test]
    fn test_history_dropped_oldest_first() {
        let mut messages = vec![ChatMessage::system("sys")];
        for i in 0..10 {
            messages.push(ChatMessage::user(words(5, &format!("h{}-", i))));
        }
        messages.push(ChatMessage::user("question"));

        // history share = 15 of 100 tokens -> three 5-word messages survive
        let out = compress_messages(
            messages,
            &config(CompressionPolicy::Proportional, 100),
            &WordCounter,
        );
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].content, "sys");
        assert!(out[1].content.starts_with("h7-"));
        assert_eq!(out[4].content, "question");
    }

    #[test]
    fn test_system_truncated_independently() {
        let messages = vec![
            ChatMessage::system(words(60, "s")),
            ChatMessage::user("short"),
        ];
        let out = compress_messages(
            messages,
            &config(CompressionPolicy::Proportional, 100),
            &WordCounter,
        );
        assert_eq!(out.len(), 2);
        assert!(out[0].content.contains(TRUNCATION_MARKER));
        assert_eq!(out[1].content, "short");
    }

    #[test]
    fn test_history_only_keeps_system_and_user() {
        let mut messages = vec![ChatMessage::system(words(40, "s"))];
        for i in 0..6 {
            messages.push(ChatMessage::assistant(words(10, &format!("h{}-", i))));
        }
        messages.push(ChatMessage::user(words(40, "u")));

        let out = compress_messages(
            messages,
            &config(CompressionPolicy::HistoryOnly, 100),
            &WordCounter,
        );
        // 100 - 40 - 40 leaves room for two history messages
        assert_eq!(out.len(), 4);
        assert!(!out[0].content.contains(TRUNCATION_MARKER));
        assert!(out[1].content.starts_with("h4-"));
        assert!(out[3].content.starts_with("u0"));
    }

    #[test]
    fn test_truncate_middle_with_zero_budget_keeps_marker() {
        let out = truncate_middle("a b c d e", 0, &WordCounter);
        assert!(out.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_middle_respects_char_boundaries() {
        let text = "ünïcödé ".repeat(50);
        let out = truncate_middle(&text, 10, &WordCounter);
        assert!(out.contains(TRUNCATION_MARKER));
    }
}
