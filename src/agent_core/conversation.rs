//! ConversationHistory: the message list owned by one conversation.
//!
//! Built fresh per `Orchestrator::run` call and discarded (or handed back in
//! the outcome) at the end. Every appended message is checked against the
//! per-role invariants first.

use crate::inference::types::Message;

use super::errors::AgentError;

#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// One system message followed by one user message.
    pub fn seeded(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
        }
    }

    pub fn push(&mut self, message: Message) -> Result<(), AgentError> {
        message.validate().map_err(|e| AgentError::InvalidMessage {
            reason: e.to_string(),
        })?;
        self.messages.push(message);
        Ok(())
    }

    /// Append in order. Stops at the first invalid message; earlier ones stay.
    pub fn extend(
        &mut self,
        messages: impl IntoIterator<Item = Message>,
    ) -> Result<(), AgentError> {
        for message in messages {
            self.push(message)?;
        }
        Ok(())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}
