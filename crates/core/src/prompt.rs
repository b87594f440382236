//! Prompt shaping shared by every backend variant.
//!
//! Turns a Grid prompt into chat messages and fits it into the backend's
//! context window. An oversized request is never sent: the prompt is
//! trimmed from the front, or the job is refused when the requested
//! generation length alone fills the window.

use serde::{Deserialize, Serialize};

/// Rough characters-per-token ratio used for context budgeting.
pub const CHARS_PER_TOKEN: usize = 4;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const PROJECT_SYSTEM_PROMPT: &str = "You are a helpful assistant with expertise in AI Power Grid (AIPG). Provide concise, accurate information about the platform.";

const PROJECT_TERMS: [&str; 3] = ["aipg", "ai power grid", "aipowergrid"];

const PROJECT_CONTEXT: &str = "AI Power Grid (AIPG) is a distributed network for AI workloads with native cryptocurrency incentives. Key points:

- Platform: Distributed AI compute network built on AI Horde with workflow engine
- Tokenomics: 150M max supply
- Network: P2P port 8865, RPC port 9788, PoW/PoUW consensus
- Links: aipowergrid.io, explorer.aipowergrid.io, pool.aipowergrid.io
- Social: @AIPowerGrid (Twitter), t.me/AIPowerGrid (Telegram)
- Meet founder: https://calendly.com/half-aipowergrid/30min";

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// The prompt does not fit the context window even when emptied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("max_length {max_length} leaves no room for a prompt in a {context_length}-token context")]
pub struct ContextOverflow {
    pub max_length: u32,
    pub context_length: u32,
}

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN) as u32
}

/// Fit `prompt` into `context_length` tokens alongside `max_length`
/// generated tokens and `reserved` tokens of fixed overhead (system
/// message).
///
/// Keeps the tail of the prompt, which in chat transcripts holds the
/// most recent turns.
pub fn fit_prompt(
    prompt: &str,
    max_length: u32,
    context_length: u32,
    reserved: u32,
) -> Result<String, ContextOverflow> {
    let budget = context_length.saturating_sub(max_length.saturating_add(reserved));
    if budget == 0 {
        return Err(ContextOverflow {
            max_length,
            context_length,
        });
    }
    if estimate_tokens(prompt) <= budget {
        return Ok(prompt.to_string());
    }

    let keep_chars = budget as usize * CHARS_PER_TOKEN;
    let total_chars = prompt.chars().count();
    let skip = total_chars.saturating_sub(keep_chars);
    Ok(prompt.chars().skip(skip).collect())
}

/// Whether the prompt asks about the Grid project itself.
pub fn mentions_project(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    PROJECT_TERMS.iter().any(|term| lower.contains(term))
}

/// Build the chat messages sent to the backend for `prompt`, fitted to
/// the context window.
///
/// For project questions only the user query is trimmed; the fact sheet
/// is dropped entirely when it would not leave room for the query.
pub fn build_messages(
    prompt: &str,
    max_length: u32,
    context_length: u32,
) -> Result<Vec<ChatMessage>, ContextOverflow> {
    if !mentions_project(prompt) {
        let reserved = estimate_tokens(DEFAULT_SYSTEM_PROMPT);
        let fitted = fit_prompt(prompt, max_length, context_length, reserved)?;
        return Ok(vec![
            ChatMessage::system(DEFAULT_SYSTEM_PROMPT),
            ChatMessage::user(fitted),
        ]);
    }

    let reserved = estimate_tokens(PROJECT_SYSTEM_PROMPT);
    let prefix = format!("{PROJECT_CONTEXT}\n\nUser Query: ");
    let user = match fit_prompt(
        prompt,
        max_length,
        context_length,
        reserved.saturating_add(estimate_tokens(&prefix)),
    ) {
        Ok(query) => format!("{prefix}{query}"),
        Err(_) => fit_prompt(prompt, max_length, context_length, reserved)?,
    };
    Ok(vec![
        ChatMessage::system(PROJECT_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ])
}
