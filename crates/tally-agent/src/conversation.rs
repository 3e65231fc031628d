//! Conversation state: the message history of one session and its usage.

use tally_ai::{Message, Usage};

/// Message history sent to the model each iteration, plus usage totals.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// Conversation messages, append-only within a session
    pub messages: Vec<Message>,
    /// Total usage across all iterations
    pub total_usage: Usage,
}

impl Conversation {
    /// Start a session from the user's question
    pub fn start(question: &str) -> Self {
        Self {
            messages: vec![Message::user(question)],
            total_usage: Usage::default(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}
