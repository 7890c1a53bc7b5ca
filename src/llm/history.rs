//! Rolling conversation history for one session.
//!
//! [`ConversationHistory`] keeps the last *N* chat messages (user and
//! assistant) and hands out a snapshot for each generation request.  Oldest
//! entries are dropped first once the window is full.

use std::collections::VecDeque;

use crate::llm::generator::{ChatMessage, Role};

/// Default window, in messages.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Bounded FIFO of chat messages.
///
/// # Example
/// ```rust
/// use voice_turn::llm::ConversationHistory;
///
/// let mut history = ConversationHistory::new(4);
/// history.push_user("hello");
/// history.push_assistant("hi there");
/// assert_eq!(history.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: VecDeque<ChatMessage>,
    limit: usize,
}

impl ConversationHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(limit + 1),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.limit {
            self.messages.pop_front();
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    /// Ignored when `content` is blank.
    pub fn push_assistant(&mut self, content: &str) {
        let content = content.trim();
        if !content.is_empty() {
            self.push(ChatMessage::assistant(content));
        }
    }

    /// Copy of the window, oldest first.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn last_role(&self) -> Option<Role> {
        self.messages.back().map(|m| m.role)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
