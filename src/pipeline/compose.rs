//! Prompt composition: document text + instruction → chat request body.
//!
//! This is the only place the context budget is enforced. Truncation happens
//! exactly once, here, before anything is sent; the relay never cuts output
//! mid-stream.

use crate::config::RelayConfig;
use crate::prompts::{exam_prompt, DEFAULT_SYSTEM_PROMPT};
use serde::Serialize;
use tracing::warn;

/// Message author as understood by OpenAI-compatible chat endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// JSON body POSTed to the upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// Cut `text` to at most `max_chars` Unicode scalar values.
///
/// Returns the input unchanged (borrowed) when it already fits.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Build the streaming chat request for `text` and `instruction`.
///
/// `model` is taken as a parameter rather than read from `config` because the
/// relay checks for its presence before composing.
pub fn compose(text: &str, instruction: &str, model: &str, config: &RelayConfig) -> ChatRequest {
    let budget = config.max_context_chars;
    let context = truncate_chars(text, budget);
    if context.len() < text.len() {
        warn!(
            "Text content length ({} chars) exceeds max_context_chars ({}); truncating",
            text.chars().count(),
            budget
        );
    }

    let system = config
        .system_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYSTEM_PROMPT);

    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: Role::System,
                content: system.to_string(),
            },
            ChatMessage {
                role: Role::User,
                content: exam_prompt(context, instruction),
            },
        ],
        stream: true,
    }
}
