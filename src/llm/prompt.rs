//! System prompt and request message assembly.

use crate::llm::generator::ChatMessage;

/// Instruction sent ahead of every conversation.
pub const SYSTEM_PROMPT: &str = "You are a friendly and intelligent AI assistant. \
Please answer user questions in concise, natural language. \
Keep responses suitable for voice conversation, avoiding overly long sentences.";

/// `[system, ...history, user(prompt)]`.
pub fn build_messages(prompt: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(prompt));
    messages
}
